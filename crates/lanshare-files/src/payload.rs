//! Logical payload stream.
//!
//! A transfer always moves one byte stream. A regular file is streamed as-is;
//! a folder is packed into a single tar archive first, and the archive is what
//! gets chunked, checksummed and announced. The receiving side mirrors this:
//! file payloads are written straight to their destination, folder payloads
//! are staged next to it and unpacked only after the checksum has been
//! verified.
//!
//! A file destination that already holds a prefix of the stream, left by an
//! interrupted transfer, is kept up to the last whole chunk and the transfer
//! resumes from there.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use walkdir::WalkDir;

use crate::checksum::StreamingChecksum;
use crate::chunker::FileChunker;

/// Name used when a received item carries no usable file name
const FALLBACK_NAME: &str = "received";

/// What a payload stream represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A single regular file
    File,
    /// A folder serialized as a tar archive
    Folder,
}

impl PayloadKind {
    /// Whether this is a folder payload
    #[must_use]
    pub fn is_folder(self) -> bool {
        matches!(self, Self::Folder)
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Folder => write!(f, "folder"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sending side
// ═══════════════════════════════════════════════════════════════════════════

/// Source of an outbound payload
///
/// For folders the archive lives in a temporary file owned by this value and
/// is removed when it is dropped.
#[derive(Debug)]
pub struct PayloadSource {
    kind: PayloadKind,
    name: String,
    origin: PathBuf,
    stream_path: PathBuf,
    size: u64,
    _archive: Option<NamedTempFile>,
}

impl PayloadSource {
    /// Open a file or folder as a payload
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist, is not readable, or the
    /// folder archive cannot be written.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use lanshare_files::PayloadSource;
    ///
    /// let source = PayloadSource::open("/home/me/photos")?;
    /// println!("{} ({} bytes, {})", source.name(), source.size(), source.kind());
    /// # Ok::<(), std::io::Error>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let origin = path.as_ref().to_path_buf();
        let metadata = fs::metadata(&origin)?;
        let name = display_name(&origin)?;

        if metadata.is_dir() {
            // Surface permission problems before the walk hides them in tar errors
            fs::read_dir(&origin)?;
            let archive = pack_folder(&origin, &name)?;
            let size = archive.as_file().metadata()?.len();
            tracing::debug!(folder = %origin.display(), archive_size = size, "packed folder payload");

            Ok(Self {
                kind: PayloadKind::Folder,
                name,
                stream_path: archive.path().to_path_buf(),
                origin,
                size,
                _archive: Some(archive),
            })
        } else if metadata.is_file() {
            fs::File::open(&origin)?;

            Ok(Self {
                kind: PayloadKind::File,
                name,
                stream_path: origin.clone(),
                origin,
                size: metadata.len(),
                _archive: None,
            })
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file or folder: {}", origin.display()),
            ))
        }
    }

    /// File or folder
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Whether the payload is a packed folder
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    /// Name announced to the receiver
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the payload was opened from
    #[must_use]
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Size of the logical stream (archive size for folders)
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Open a fresh reader positioned at the start of the stream
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying file cannot be opened.
    pub async fn open_stream(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::File::open(&self.stream_path).await
    }
}

/// Pack `dir` into a temporary tar archive with entries rooted at `name`
///
/// Entries are added in file-name order so the same tree always produces the
/// same archive. Symlinks are skipped.
fn pack_folder(dir: &Path, name: &str) -> io::Result<NamedTempFile> {
    let archive = tempfile::Builder::new()
        .prefix(".lanshare-")
        .suffix(".tar")
        .tempfile()?;

    let mut builder = tar::Builder::new(archive.as_file().try_clone()?);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let archived = Path::new(name).join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            builder.append_dir(&archived, entry.path())?;
        } else if file_type.is_file() {
            builder.append_path_with_name(entry.path(), &archived)?;
        } else {
            tracing::warn!(path = %entry.path().display(), "skipping non-regular entry in folder payload");
        }
    }

    let file = builder.into_inner()?;
    file.sync_all()?;
    Ok(archive)
}

/// Last path component of `path`, resolving `.` and `/`-style inputs
fn display_name(path: &Path) -> io::Result<String> {
    let named = match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => fs::canonicalize(path)?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| FALLBACK_NAME.to_string()),
    };
    Ok(named)
}

// ═══════════════════════════════════════════════════════════════════════════
// Receiving side
// ═══════════════════════════════════════════════════════════════════════════

/// Destination of an inbound payload
#[derive(Debug)]
pub struct PayloadSink {
    kind: PayloadKind,
    /// Final location of the received item
    target: PathBuf,
    /// Directory a folder archive unpacks into
    unpack_dir: PathBuf,
    file: tokio::fs::File,
    staging: Option<NamedTempFile>,
    /// Length of the destination before this sink opened it
    existing_len: u64,
    /// Whether the destination file was created by this sink
    created: bool,
    written: u64,
}

impl PayloadSink {
    /// Prepare a destination for an inbound payload
    ///
    /// For a file payload, `save_path` is either the destination file or an
    /// existing directory, in which case the announced name is appended. For
    /// a folder payload, `save_path` is the directory the folder is unpacked
    /// into; it is created if missing.
    ///
    /// The destination is opened here, so a path that cannot be written is
    /// reported before any payload byte is accepted. An existing file is not
    /// truncated yet; [`resume`](Self::resume) decides how much of it stays.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be created.
    pub fn create<P: AsRef<Path>>(save_path: P, name: &str, kind: PayloadKind) -> io::Result<Self> {
        let save_path = save_path.as_ref();
        let name = sanitize_file_name(name);

        match kind {
            PayloadKind::File => {
                let target = if save_path.is_dir() {
                    save_path.join(&name)
                } else {
                    save_path.to_path_buf()
                };
                if let Some(parent) = target.parent() {
                    if !parent.as_os_str().is_empty() && !parent.is_dir() {
                        return Err(io::Error::new(
                            io::ErrorKind::NotFound,
                            format!("destination directory does not exist: {}", parent.display()),
                        ));
                    }
                }
                let created = !target.exists();
                let file = fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&target)?;
                let existing_len = file.metadata()?.len();

                Ok(Self {
                    kind,
                    unpack_dir: target.parent().map(Path::to_path_buf).unwrap_or_default(),
                    target,
                    file: tokio::fs::File::from_std(file),
                    staging: None,
                    existing_len,
                    created,
                    written: 0,
                })
            }
            PayloadKind::Folder => {
                fs::create_dir_all(save_path)?;
                let staging = tempfile::Builder::new()
                    .prefix(".lanshare-")
                    .suffix(".tar.part")
                    .tempfile_in(save_path)?;
                let file = staging.as_file().try_clone()?;

                Ok(Self {
                    kind,
                    target: save_path.join(&name),
                    unpack_dir: save_path.to_path_buf(),
                    file: tokio::fs::File::from_std(file),
                    staging: Some(staging),
                    existing_len: 0,
                    created: true,
                    written: 0,
                })
            }
        }
    }

    /// File or folder
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Where the item ends up once finished
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Bytes written so far
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Bytes already present at the destination when it was opened
    #[must_use]
    pub fn existing_len(&self) -> u64 {
        self.existing_len
    }

    /// Position the sink for a `total`-byte stream cut by `chunker`
    ///
    /// Must be called once before the first [`write_chunk`](Self::write_chunk).
    /// A file destination shorter than `total` keeps its whole chunks; they
    /// are hashed into the returned checksum and the file is cut back to
    /// them. Anything else starts from an empty file. Returns the index of
    /// the first chunk still needed.
    ///
    /// # Errors
    ///
    /// Returns an error if reading, truncating or seeking the destination
    /// fails.
    pub async fn resume(
        &mut self,
        chunker: &FileChunker,
        total: u64,
    ) -> io::Result<(u64, StreamingChecksum)> {
        let mut checksum = StreamingChecksum::new();
        let keep_chunks = match self.kind {
            PayloadKind::File if self.existing_len < total => chunker.whole_chunks(self.existing_len),
            _ => 0,
        };
        let keep = chunker.offset_of(keep_chunks);

        if keep_chunks > 0 {
            self.file.seek(SeekFrom::Start(0)).await?;
            chunker
                .hash_chunks(&mut self.file, total, keep_chunks, &mut checksum)
                .await?;
            tracing::debug!(
                target = %self.target.display(),
                existing = self.existing_len,
                kept = keep,
                "resuming into partial destination"
            );
        }

        self.file.set_len(keep).await?;
        self.file.seek(SeekFrom::Start(keep)).await?;
        self.written = keep;
        Ok((keep_chunks, checksum))
    }

    /// Drop the sink without materializing anything
    ///
    /// A destination file this sink created is removed; one that existed
    /// before is left as it is on disk.
    pub fn discard(self) {
        if self.kind == PayloadKind::File && self.created {
            drop(self.file);
            if let Err(e) = fs::remove_file(&self.target) {
                tracing::debug!(target = %self.target.display(), error = %e, "could not remove unused destination");
            }
        }
    }

    /// Append the next chunk of the stream
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush the stream and materialize the item
    ///
    /// Call only after the stream has been verified. Folder archives are
    /// unpacked into the destination directory and the staging file removed.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or unpacking fails.
    pub async fn finish(mut self) -> io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        if let Some(staging) = self.staging.take() {
            let unpack_dir = self.unpack_dir.clone();
            tokio::task::spawn_blocking(move || unpack_archive(&staging, &unpack_dir))
                .await
                .map_err(io::Error::other)??;
        }

        Ok(self.target)
    }
}

/// Unpack a staged folder archive; the staging file is deleted on drop
fn unpack_archive(staging: &NamedTempFile, dir: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(fs::File::open(staging.path())?);
    archive.set_preserve_permissions(false);
    archive.unpack(dir)
}

/// Reduce a peer-supplied name to a single safe path component
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let candidate = name
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("");
    match candidate {
        "" | "." | ".." => FALLBACK_NAME.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_file;
    use tokio::io::AsyncReadExt;

    fn write_tree(root: &Path) {
        fs::create_dir_all(root.join("nested/deeper")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("nested/b.bin"), vec![7u8; 4096]).unwrap();
        fs::write(root.join("nested/deeper/c.txt"), b"gamma").unwrap();
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("dir\\evil.exe"), "evil.exe");
        assert_eq!(sanitize_file_name("trailing/"), "trailing");
        assert_eq!(sanitize_file_name(".."), "received");
        assert_eq!(sanitize_file_name(""), "received");
    }

    #[test]
    fn test_open_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"hello").unwrap();

        let source = PayloadSource::open(&path).unwrap();
        assert_eq!(source.kind(), PayloadKind::File);
        assert!(!source.is_folder());
        assert_eq!(source.name(), "notes.txt");
        assert_eq!(source.size(), 5);
    }

    #[test]
    fn test_open_missing_source() {
        let err = PayloadSource::open("/nonexistent/lanshare/source").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_folder_source_size_is_archive_size() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("album");
        write_tree(&root);

        let source = PayloadSource::open(&root).unwrap();
        assert!(source.is_folder());
        assert_eq!(source.name(), "album");

        // tar pads to 512-byte records, so the stream is larger than the content
        let content = 5 + 4096 + 5;
        assert!(source.size() > content);
        assert_eq!(source.size() % 512, 0);
    }

    #[test]
    fn test_folder_archive_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("album");
        write_tree(&root);

        let first = PayloadSource::open(&root).unwrap();
        let second = PayloadSource::open(&root).unwrap();
        assert_eq!(first.size(), second.size());
    }

    #[tokio::test]
    async fn test_file_sink_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PayloadSink::create(dir.path(), "../x/report.txt", PayloadKind::File).unwrap();
        assert_eq!(sink.target(), dir.path().join("report.txt"));
        let (index, _) = sink.resume(&FileChunker::new(), 6).await.unwrap();
        assert_eq!(index, 0);

        sink.write_chunk(b"abc").await.unwrap();
        sink.write_chunk(b"def").await.unwrap();
        assert_eq!(sink.written(), 6);

        let path = sink.finish().await.unwrap();
        assert_eq!(fs::read(path).unwrap(), b"abcdef");
    }

    #[test]
    fn test_file_sink_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let save = dir.path().join("missing").join("out.bin");
        let err = PayloadSink::create(&save, "out.bin", PayloadKind::File).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_folder_roundtrip_through_sink() {
        let src_dir = tempfile::tempdir().unwrap();
        let root = src_dir.path().join("album");
        write_tree(&root);
        let source = PayloadSource::open(&root).unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let mut sink = PayloadSink::create(dst_dir.path(), source.name(), PayloadKind::Folder).unwrap();
        sink.resume(&FileChunker::new(), source.size()).await.unwrap();

        let mut reader = source.open_stream().await.unwrap();
        let mut buf = vec![0u8; 1000];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            sink.write_chunk(&buf[..n]).await.unwrap();
        }
        assert_eq!(sink.written(), source.size());

        let out = sink.finish().await.unwrap();
        assert_eq!(out, dst_dir.path().join("album"));
        assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(
            checksum_file(out.join("nested/b.bin"), 512).unwrap(),
            checksum_file(root.join("nested/b.bin"), 512).unwrap()
        );
        assert_eq!(fs::read(out.join("nested/deeper/c.txt")).unwrap(), b"gamma");

        // Staging archive is gone, only the unpacked folder remains
        let leftovers: Vec<_> = fs::read_dir(dst_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("album")]);
    }

    #[tokio::test]
    async fn test_resume_keeps_whole_chunks() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("big.bin");
        // Interrupted after 2.5 chunks of 1000 bytes
        fs::write(&target, &data[..2500]).unwrap();

        let chunker = FileChunker::with_chunk_size(1000).unwrap();
        let mut sink = PayloadSink::create(dir.path(), "big.bin", PayloadKind::File).unwrap();
        assert_eq!(sink.existing_len(), 2500);

        let (index, mut checksum) = sink.resume(&chunker, data.len() as u64).await.unwrap();
        assert_eq!(index, 2);
        assert_eq!(sink.written(), 2000);
        assert_eq!(checksum.bytes_hashed(), 2000);

        sink.write_chunk(&data[2000..]).await.unwrap();
        checksum.update(&data[2000..]);
        assert_eq!(checksum.finalize(), crate::checksum::checksum_bytes(&data));

        let path = sink.finish().await.unwrap();
        assert_eq!(fs::read(path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_resume_restarts_oversized_destination() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("old.txt");
        fs::write(&target, vec![9u8; 5000]).unwrap();

        let mut sink = PayloadSink::create(&target, "old.txt", PayloadKind::File).unwrap();
        let (index, checksum) = sink.resume(&FileChunker::with_chunk_size(1000).unwrap(), 3000).await.unwrap();
        assert_eq!(index, 0);
        assert_eq!(checksum.bytes_hashed(), 0);

        sink.write_chunk(b"new").await.unwrap();
        let path = sink.finish().await.unwrap();
        assert_eq!(fs::read(path).unwrap(), b"new");
    }

    #[test]
    fn test_open_does_not_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("keep.txt");
        fs::write(&target, b"precious").unwrap();

        let sink = PayloadSink::create(&target, "keep.txt", PayloadKind::File).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"precious");

        // Discarding leaves a pre-existing file alone
        sink.discard();
        assert_eq!(fs::read(&target).unwrap(), b"precious");
    }

    #[test]
    fn test_discard_removes_created_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fresh.bin");

        let sink = PayloadSink::create(&target, "fresh.bin", PayloadKind::File).unwrap();
        assert!(target.exists());
        sink.discard();
        assert!(!target.exists());
    }
}
