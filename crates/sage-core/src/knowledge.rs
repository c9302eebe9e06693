//! Knowledge base: the vector store and document log, kept index-aligned
//! and mirrored to two append-only files.
//!
//! # File layout
//!
//! ```text
//! vector file:   "SAGEVEC1" | u32 dimension | record*   (record = u32 len | bincode Vec<f32>)
//! document file: "SAGEDOC1" | record*                   (record = u32 len | UTF-8 text)
//! ```
//!
//! Both files are read in full when the knowledge base is opened. Every
//! insertion appends one record to each file (vector first, then document)
//! and flushes and syncs both before returning, so the in-memory state never
//! runs ahead of the disk. A failed append cuts both files back to their
//! previous length; if that fails too, the knowledge base refuses further
//! appends until it is reopened.
//!
//! A crash in the middle of an insertion leaves either an incomplete final
//! record or a vector without its document. Both are repaired on the next
//! open by truncating the unmatched tail. Anything else that fails to
//! decode aborts the open with [`SageError::CorruptStore`].

use crate::documents::{DocumentLog, decode_records, encode_record};
use crate::error::{Result, SageError};
use crate::store::FlatVectorStore;
use crate::types::{RetrievedSnippet, Snippet, Vector};
use bincode::config;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

const VECTOR_MAGIC: &[u8; 8] = b"SAGEVEC1";
const DOCUMENT_MAGIC: &[u8; 8] = b"SAGEDOC1";
const VECTOR_HEADER_LEN: usize = VECTOR_MAGIC.len() + 4;
const DOCUMENT_HEADER_LEN: usize = DOCUMENT_MAGIC.len();

/// Size information about the knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub snippets: usize,
    pub vectors: usize,
    pub dimension: usize,
    pub vector_path: Option<PathBuf>,
    pub document_path: Option<PathBuf>,
}

struct Persistence {
    vector_path: PathBuf,
    document_path: PathBuf,
    /// `None` when the files were opened read-only
    writer: Option<Writer>,
}

/// Append handles plus the committed length of each file.
struct Writer {
    vector_file: File,
    document_file: File,
    vector_len: u64,
    document_len: u64,
    /// Set when a failed append could not be rolled back
    unwritable: bool,
}

impl Writer {
    async fn append(
        &mut self,
        paths: (&Path, &Path),
        vector_record: &[u8],
        document_record: &[u8],
    ) -> Result<()> {
        if self.unwritable {
            return Err(SageError::Storage(
                "knowledge base files are out of step after a failed append; reopen to repair"
                    .to_string(),
            ));
        }

        match self.write_pair(vector_record, document_record).await {
            Ok(()) => {
                self.vector_len += vector_record.len() as u64;
                self.document_len += document_record.len() as u64;
                Ok(())
            }
            Err(e) => {
                warn!("Append failed, rolling back both store files: {}", e);
                if let Err(rollback) = self.rollback(paths).await {
                    error!("Rollback failed, refusing further appends: {}", rollback);
                    self.unwritable = true;
                }
                Err(e)
            }
        }
    }

    async fn write_pair(&mut self, vector_record: &[u8], document_record: &[u8]) -> Result<()> {
        self.vector_file.write_all(vector_record).await?;
        self.vector_file.flush().await?;
        self.vector_file.sync_data().await?;
        self.document_file.write_all(document_record).await?;
        self.document_file.flush().await?;
        self.document_file.sync_data().await?;
        Ok(())
    }

    async fn rollback(&mut self, (vector_path, document_path): (&Path, &Path)) -> Result<()> {
        truncate_to(vector_path, self.vector_len).await?;
        truncate_to(document_path, self.document_len).await?;
        Ok(())
    }
}

/// Decoded contents of both files, cut to the prefix they agree on.
struct Loaded {
    vectors: FlatVectorStore,
    documents: DocumentLog,
    vector_len: u64,
    document_len: u64,
    vector_keep: u64,
    document_keep: u64,
}

pub struct KnowledgeBase {
    vectors: FlatVectorStore,
    documents: DocumentLog,
    persistence: Option<Persistence>,
}

impl KnowledgeBase {
    /// A knowledge base that lives only in memory.
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            vectors: FlatVectorStore::new(dimension),
            documents: DocumentLog::new(),
            persistence: None,
        }
    }

    /// Load the persisted pair, creating empty files when they do not exist
    /// and truncating any unmatched tail.
    pub async fn open(vector_path: &Path, document_path: &Path, dimension: usize) -> Result<Self> {
        let loaded = load(vector_path, document_path, dimension, true).await?;

        if loaded.vector_keep < loaded.vector_len {
            warn!(
                "Truncating {} bytes of unmatched records from {}",
                loaded.vector_len - loaded.vector_keep,
                vector_path.display()
            );
            truncate_to(vector_path, loaded.vector_keep).await?;
        }
        if loaded.document_keep < loaded.document_len {
            warn!(
                "Truncating {} bytes of unmatched records from {}",
                loaded.document_len - loaded.document_keep,
                document_path.display()
            );
            truncate_to(document_path, loaded.document_keep).await?;
        }

        let vector_file = OpenOptions::new().append(true).open(vector_path).await?;
        let document_file = OpenOptions::new().append(true).open(document_path).await?;

        info!(
            "Knowledge base loaded: {} snippets from {}",
            loaded.documents.len(),
            document_path.display()
        );

        Ok(Self {
            vectors: loaded.vectors,
            documents: loaded.documents,
            persistence: Some(Persistence {
                vector_path: vector_path.to_path_buf(),
                document_path: document_path.to_path_buf(),
                writer: Some(Writer {
                    vector_file,
                    document_file,
                    vector_len: loaded.vector_keep,
                    document_len: loaded.document_keep,
                    unwritable: false,
                }),
            }),
        })
    }

    /// Load the persisted pair without touching the files.
    ///
    /// Missing files read as empty and an unmatched tail is skipped rather
    /// than truncated. [`KnowledgeBase::add`] fails on the result.
    pub async fn open_read_only(
        vector_path: &Path,
        document_path: &Path,
        dimension: usize,
    ) -> Result<Self> {
        let loaded = load(vector_path, document_path, dimension, false).await?;

        Ok(Self {
            vectors: loaded.vectors,
            documents: loaded.documents,
            persistence: Some(Persistence {
                vector_path: vector_path.to_path_buf(),
                document_path: document_path.to_path_buf(),
                writer: None,
            }),
        })
    }

    /// Append a snippet and its embedding, flushing both to disk.
    ///
    /// When either file write fails, both files are cut back to their
    /// previous length and the in-memory state is left unchanged.
    pub async fn add(&mut self, snippet: &Snippet, vector: Vector) -> Result<usize> {
        if vector.len() != self.vectors.dimension() {
            return Err(SageError::DimensionMismatch {
                expected: self.vectors.dimension(),
                got: vector.len(),
            });
        }

        if let Some(persistence) = self.persistence.as_mut() {
            let Some(writer) = persistence.writer.as_mut() else {
                return Err(SageError::Storage(
                    "knowledge base was opened read-only".to_string(),
                ));
            };

            let payload = bincode::serde::encode_to_vec(&vector, config::standard())
                .map_err(|e| SageError::Storage(format!("Serialization failed: {}", e)))?;
            let mut vector_record = Vec::with_capacity(payload.len() + 4);
            encode_record(&payload, &mut vector_record)?;
            let document_record = DocumentLog::encode_entry(&snippet.content)?;

            writer
                .append(
                    (&persistence.vector_path, &persistence.document_path),
                    &vector_record,
                    &document_record,
                )
                .await?;
        }

        let index = self.vectors.add(vector)?;
        self.documents.append(snippet.content.clone());

        info!(source = %snippet.source, index, "Added snippet");
        Ok(index)
    }

    /// Top-`k` snippets nearest to `query`.
    ///
    /// Indices without a matching document entry are skipped.
    pub fn retrieve(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedSnippet>> {
        let neighbors = self.vectors.search(query, k)?;

        let snippets = neighbors
            .into_iter()
            .filter_map(|neighbor| match self.documents.get(neighbor.index) {
                Some(content) => Some(RetrievedSnippet {
                    index: neighbor.index,
                    distance: neighbor.distance,
                    content: content.to_string(),
                }),
                None => {
                    debug!(
                        "Skipping index {} beyond document log length {}",
                        neighbor.index,
                        self.documents.len()
                    );
                    None
                }
            })
            .collect();

        Ok(snippets)
    }

    pub fn document(&self, index: usize) -> Option<&str> {
        self.documents.get(index)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    pub fn stats(&self) -> KnowledgeStats {
        KnowledgeStats {
            snippets: self.documents.len(),
            vectors: self.vectors.len(),
            dimension: self.vectors.dimension(),
            vector_path: self.persistence.as_ref().map(|p| p.vector_path.clone()),
            document_path: self.persistence.as_ref().map(|p| p.document_path.clone()),
        }
    }
}

async fn load(
    vector_path: &Path,
    document_path: &Path,
    dimension: usize,
    create: bool,
) -> Result<Loaded> {
    let vector_body = read_body(vector_path, VECTOR_MAGIC, Some(dimension), create).await?;
    let document_body = read_body(document_path, DOCUMENT_MAGIC, None, create).await?;

    let vector_records = decode_records(&vector_body);
    let mut vectors = Vec::with_capacity(vector_records.records.len());
    for (i, record) in vector_records.records.iter().enumerate() {
        let (vector, _): (Vector, usize) =
            bincode::serde::decode_from_slice(record, config::standard()).map_err(|e| {
                SageError::corrupt(vector_path, format!("vector record {}: {}", i, e))
            })?;
        vectors.push(vector);
    }

    let mut documents = DocumentLog::decode(&document_body, document_path)?;

    // Keep only the prefix both files agree on
    let aligned = vectors.len().min(documents.len());
    if vectors.len() != documents.len() {
        warn!(
            "Index drift: {} vectors but {} documents, dropping the unmatched tail",
            vectors.len(),
            documents.len()
        );
        vectors.truncate(aligned);
        documents.truncate(aligned);
    }

    let vector_keep: usize = VECTOR_HEADER_LEN
        + vector_records.records[..aligned]
            .iter()
            .map(|record| record.len() + 4)
            .sum::<usize>();
    let document_keep = DOCUMENT_HEADER_LEN + documents.encoded_len(aligned);

    let vectors = FlatVectorStore::from_vectors(dimension, vectors)
        .map_err(|e| SageError::corrupt(vector_path, e.to_string()))?;

    Ok(Loaded {
        vectors,
        documents,
        vector_len: (VECTOR_HEADER_LEN + vector_body.len()) as u64,
        document_len: (DOCUMENT_HEADER_LEN + document_body.len()) as u64,
        vector_keep: vector_keep as u64,
        document_keep: document_keep as u64,
    })
}

fn header(magic: &[u8; 8], dimension: Option<usize>) -> Result<Vec<u8>> {
    let mut header = magic.to_vec();
    if let Some(dimension) = dimension {
        let dimension = u32::try_from(dimension)
            .map_err(|_| SageError::Config(format!("dimension {} is too large", dimension)))?;
        header.extend_from_slice(&dimension.to_le_bytes());
    }
    Ok(header)
}

/// Read a store file and return the bytes after its header.
///
/// A missing or empty file reads as an empty body. With `create` set it is
/// also written out with just a header.
async fn read_body(
    path: &Path,
    magic: &[u8; 8],
    dimension: Option<usize>,
    create: bool,
) -> Result<Vec<u8>> {
    let header = header(magic, dimension)?;

    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    if bytes.is_empty() {
        if create {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await?;
                }
            }
            fs::write(path, &header).await?;
            info!("Created empty store file: {}", path.display());
        }
        return Ok(Vec::new());
    }

    if bytes.len() < header.len() || &bytes[..magic.len()] != magic {
        return Err(SageError::corrupt(path, "unrecognized file header"));
    }

    if let Some(expected) = dimension {
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&bytes[magic.len()..header.len()]);
        let stored = u32::from_le_bytes(stored) as usize;
        if stored != expected {
            return Err(SageError::corrupt(
                path,
                format!("stored dimension {} but embeddings have {}", stored, expected),
            ));
        }
    }

    Ok(bytes[header.len()..].to_vec())
}

async fn truncate_to(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path).await?;
    file.set_len(len).await?;
    file.sync_all().await?;
    Ok(())
}
