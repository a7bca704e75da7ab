//! The iroh node behind [`IrohTransport`](crate::transport::IrohTransport).
//!
//! Blobs, docs and gossip share one endpoint. The endpoint key and the
//! author of each status document are kept next to the store, so a peer
//! restarting from the same directory keeps its [`PeerId`] and keeps
//! appending to the log under the same author.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;
use iroh::protocol::Router;
use iroh::{EndpointId, SecretKey};
use iroh_blobs::{ALPN as BLOBS_ALPN, BlobsProtocol, store::fs::FsStore};
use iroh_docs::api::Doc;
use iroh_docs::api::protocol::ShareMode;
use iroh_docs::sync::Entry;
use iroh_docs::{ALPN as DOCS_ALPN, Author, AuthorId, DocTicket, NamespaceId, protocol::Docs};
use iroh_gossip::{ALPN as GOSSIP_ALPN, net::Gossip};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::peer::PeerId;

const KEY_FILE: &str = "keypair";

pub(crate) struct IrohNode {
    router: Router,
    store: FsStore,
    docs: Docs,
    gossip: Gossip,
    dir: PathBuf,
    /// Throwaway store when no directory was given.
    _tempdir: Option<TempDir>,
}

/// A status document we may write to, and the peers to dial for it.
pub(crate) struct Swarm {
    pub(crate) doc: Doc,
    pub(crate) author: AuthorId,
    pub(crate) ticket: DocTicket,
    pub(crate) bootstrap: Vec<EndpointId>,
}

impl IrohNode {
    /// Start a node persisted under `store_path`, or in a temporary
    /// directory that disappears with the node.
    pub(crate) async fn start(store_path: Option<PathBuf>) -> Result<Self> {
        let (dir, tempdir) = match store_path {
            Some(dir) => (dir, None),
            None => {
                let tempdir = tempfile::tempdir()?;
                (tempdir.path().to_path_buf(), Some(tempdir))
            }
        };
        tokio::fs::create_dir_all(&dir).await?;

        let key = load_or_create_key(&dir.join(KEY_FILE)).await?;
        let endpoint = iroh::Endpoint::builder().secret_key(key).bind().await?;
        let gossip = Gossip::builder().spawn(endpoint.clone());
        let store = FsStore::load(&dir).await?;
        let docs = Docs::persistent(dir.clone())
            .spawn(endpoint.clone(), (*store).clone(), gossip.clone())
            .await?;
        let router = Router::builder(endpoint.clone())
            .accept(BLOBS_ALPN, BlobsProtocol::new(&store, None))
            .accept(GOSSIP_ALPN, gossip.clone())
            .accept(DOCS_ALPN, docs.clone())
            .spawn();
        debug!(id = %endpoint.id(), dir = %dir.display(), "iroh node started");

        Ok(Self {
            router,
            store,
            docs,
            gossip,
            dir,
            _tempdir: tempdir,
        })
    }

    /// New status document, writable by anybody holding the ticket.
    pub(crate) async fn create_swarm(&self) -> Result<Swarm> {
        let doc = self.docs.create().await?;
        let author = self.author_for(doc.id()).await?;
        let ticket = doc.share(ShareMode::Write, Default::default()).await?;
        info!(doc = %doc.id(), "created swarm");
        Ok(Swarm {
            doc,
            author,
            ticket,
            bootstrap: Vec::new(),
        })
    }

    pub(crate) async fn join_swarm(&self, ticket: DocTicket) -> Result<Swarm> {
        let doc = self.docs.import(ticket.clone()).await?;
        let author = self.author_for(doc.id()).await?;
        let bootstrap = ticket.nodes.iter().map(|addr| addr.id).collect();
        info!(doc = %doc.id(), "joined swarm");
        Ok(Swarm {
            doc,
            author,
            ticket,
            bootstrap,
        })
    }

    /// The author we write `doc` with, created on first use.
    async fn author_for(&self, doc: NamespaceId) -> Result<AuthorId> {
        let path = self.dir.join(format!("{doc}.author"));
        if path.exists() {
            let bytes = tokio::fs::read(&path).await?;
            let bytes: &[u8; 32] = bytes
                .as_slice()
                .try_into()
                .with_context(|| format!("author file holds {} bytes, not 32", bytes.len()))?;
            let author = Author::from_bytes(bytes);
            let id = author.id();
            self.docs.author_import(author).await?;
            debug!(%doc, author = %id, "reusing author");
            return Ok(id);
        }

        let id = self.docs.author_create().await?;
        let author = self
            .docs
            .author_export(id)
            .await?
            .context("freshly created author could not be exported")?;
        write_atomically(&path, &author.to_bytes()).await?;
        Ok(id)
    }

    pub(crate) fn endpoint_id(&self) -> EndpointId {
        self.router.endpoint().id()
    }

    pub(crate) fn peer_id(&self) -> PeerId {
        PeerId::from(self.endpoint_id())
    }

    pub(crate) fn gossip(&self) -> &Gossip {
        &self.gossip
    }

    /// Content of a doc entry. Fails if the blob has not arrived yet.
    pub(crate) async fn content(&self, entry: &Entry) -> Result<Bytes> {
        Ok(self.store.blobs().get_bytes(entry.content_hash()).await?)
    }

    pub(crate) async fn shutdown(self) -> Result<()> {
        self.router.shutdown().await?;
        Ok(())
    }
}

async fn load_or_create_key(path: &Path) -> Result<SecretKey> {
    if path.exists() {
        let bytes = tokio::fs::read(path).await?;
        let bytes: &[u8; 32] = bytes
            .get(..32)
            .and_then(|head| head.try_into().ok())
            .context("keypair file is shorter than 32 bytes")?;
        return Ok(SecretKey::from_bytes(bytes));
    }
    let key = SecretKey::generate(&mut rand::rng());
    write_atomically(path, &key.to_bytes()).await?;
    Ok(key)
}

/// Write to a temp file in the same directory, then rename into place.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("no parent directory for '{}'", path.display()))?;
    tokio::fs::create_dir_all(parent).await?;

    let (file, temp_path) = tempfile::NamedTempFile::new_in(parent)
        .context("unable to create tempfile")?
        .into_parts();
    let mut file = tokio::fs::File::from_std(file);
    file.write_all(bytes)
        .await
        .with_context(|| format!("unable to write '{}'", path.display()))?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(temp_path, path)
        .await
        .with_context(|| format!("unable to move '{}' into place", path.display()))?;
    Ok(())
}
