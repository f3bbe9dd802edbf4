use std::{
  io::ErrorKind,
  path::{Path, PathBuf},
  sync::atomic::Ordering,
};

use compio::io::{AsyncReadAtExt, AsyncWriteAtExt};
use compio_fs::{File, OpenOptions};
use log::{info, warn};
use md5::{Digest, Md5};
use uuid::Uuid;
use zerocopy::IntoBytes;

use super::{Chunk, Writer};
use crate::{
  conf::ChunkConf,
  consts::{FOOTER_SIZE, HEADER_SIZE, MIN_COMPAT_VERSION, READ_BLOCK, VERSION_ALIGNED, VERSION_UNALIGNED},
  error::{Error, Result, corrupt},
  footer::ChunkFooter,
  header::ChunkHeader,
};

async fn read_at(file: &File, pos: u64, len: usize) -> Result<Vec<u8>> {
  let buf = vec![0u8; len];
  let res = file.read_exact_at(buf, pos).await;
  res.0?;
  Ok(res.1)
}

async fn open_existing(path: &Path, write: bool) -> Result<File> {
  match OpenOptions::new().read(true).write(write).open(path).await {
    Ok(f) => Ok(f),
    Err(e) if e.kind() == ErrorKind::NotFound => Err(corrupt(path, "chunk file not found")),
    Err(e) => Err(e.into()),
  }
}

async fn read_header(file: &File, path: &Path, size: u64) -> Result<ChunkHeader> {
  if size < HEADER_SIZE as u64 {
    return Err(corrupt(path, format!("file too short for header: {size} bytes")));
  }
  let raw = read_at(file, 0, HEADER_SIZE).await?;
  let header = ChunkHeader::decode(&raw).ok_or_else(|| corrupt(path, "unreadable header"))?;
  let version = header.version();
  if !(MIN_COMPAT_VERSION..=VERSION_ALIGNED).contains(&version) {
    return Err(Error::WrongVersion {
      path: path.to_path_buf(),
      version,
    });
  }
  if header.chunk_size() == 0 || header.start() > header.end() {
    return Err(corrupt(path, "invalid chunk range in header"));
  }
  Ok(header)
}

/// MD5 of raw bytes [0, len) / 计算 [0, len) 的 MD5
async fn hash_prefix(file: &File, len: u64) -> Result<Md5> {
  let mut md5 = Md5::new();
  let mut pos = 0u64;
  while pos < len {
    let n = (len - pos).min(READ_BLOCK as u64) as usize;
    md5.update(read_at(file, pos, n).await?);
    pos += n as u64;
  }
  Ok(md5)
}

/// compio files cannot be resized, so this runs on the blocking pool
/// compio 文件不支持改长度，放到阻塞线程池执行
async fn truncate(path: PathBuf, len: u64) -> Result<()> {
  compio_runtime::spawn_blocking(move || {
    std::fs::OpenOptions::new()
      .write(true)
      .open(&path)?
      .set_len(len)
  })
  .await
  .map_err(|_| std::io::Error::other("truncate task panicked"))??;
  Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
  let mut name = path.as_os_str().to_owned();
  name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
  PathBuf::from(name)
}

impl Chunk {
  /// Header and, when completed, footer of a chunk file / 读取块头与已完成块尾
  pub async fn peek(path: impl AsRef<Path>) -> Result<(ChunkHeader, Option<ChunkFooter>)> {
    let path = path.as_ref();
    let file = open_existing(path, false).await?;
    let size = file.metadata().await?.len();
    let header = read_header(&file, path, size).await?;
    if size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
      return Ok((header, None));
    }
    let raw = read_at(&file, size - FOOTER_SIZE as u64, FOOTER_SIZE).await?;
    let footer = ChunkFooter::decode(&raw).filter(|f| f.is_completed());
    Ok((header, footer))
  }

  /// Create an empty ongoing chunk / 新建空的写入中块
  pub async fn create_new(
    path: impl AsRef<Path>,
    chunk_size: u32,
    start: u32,
    end: u32,
    scavenged: bool,
    conf: ChunkConf,
  ) -> Result<Self> {
    let header = ChunkHeader::new(chunk_size, start, end, scavenged, Uuid::new_v4());
    Self::create(path.as_ref(), header, None, conf).await
  }

  /// Create a chunk that receives raw bytes up to `file_size`
  /// 新建接收原始字节的块，目标长度 file_size
  pub async fn create_with_header(
    path: impl AsRef<Path>,
    header: ChunkHeader,
    file_size: u64,
    conf: ChunkConf,
  ) -> Result<Self> {
    Self::create(path.as_ref(), header, Some(file_size), conf).await
  }

  async fn create(
    path: &Path,
    header: ChunkHeader,
    raw_len: Option<u64>,
    conf: ChunkConf,
  ) -> Result<Self> {
    let tmp = temp_path(path);
    {
      let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .await?;
      file.write_all_at(header.as_bytes().to_vec(), 0).await.0?;
      file.sync_all().await?;
    }
    compio_fs::rename(&tmp, path).await?;

    let file = open_existing(path, true).await?;
    let mut md5 = Md5::new();
    md5.update(header.as_bytes());

    let mut chunk = Self::build(path.to_path_buf(), header, None, conf, false);
    chunk
      .file_size
      .store(HEADER_SIZE as u64, Ordering::Release);
    *chunk.writer.get_mut() = Some(Writer {
      file,
      pos: HEADER_SIZE as u64,
      md5,
      buf: Vec::new(),
      raw_len,
    });
    chunk.pool.fill(&chunk.path, chunk.conf.reader_count).await?;
    info!("created chunk {chunk}");
    Ok(chunk)
  }

  /// Open a completed chunk read-only / 只读打开已完成块
  pub async fn open_completed(
    path: impl AsRef<Path>,
    verify_hash: bool,
    conf: ChunkConf,
  ) -> Result<Self> {
    let path = path.as_ref();
    let file = open_existing(path, false).await?;
    let size = file.metadata().await?.len();
    let header = read_header(&file, path, size).await?;
    if size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
      return Err(corrupt(path, format!("file too short for footer: {size} bytes")));
    }
    let raw = read_at(&file, size - FOOTER_SIZE as u64, FOOTER_SIZE).await?;
    let footer = ChunkFooter::decode(&raw).ok_or_else(|| corrupt(path, "unreadable footer"))?;
    if !footer.is_completed() {
      return Err(corrupt(path, "chunk should be completed, but is not"));
    }
    let used =
      HEADER_SIZE as u64 + footer.physical_data_size() + footer.map_size() + FOOTER_SIZE as u64;
    if header.version() == VERSION_UNALIGNED {
      if size != used {
        return Err(corrupt(
          path,
          format!("expected file size {used}, found {size}"),
        ));
      }
    } else if size < used {
      return Err(corrupt(
        path,
        format!("file size {size} smaller than content {used}"),
      ));
    }
    drop(file);

    let chunk = Self::build(path.to_path_buf(), header, Some(footer), conf, true);
    chunk.file_size.store(size, Ordering::Release);
    chunk.pool.fill(&chunk.path, chunk.conf.reader_count).await?;
    if verify_hash {
      chunk.verify_file_hash().await?;
    }
    Ok(chunk)
  }

  /// Reopen the last ongoing chunk at `write_pos`, dropping any torn tail
  /// 在 write_pos 处重开写入中块，截断残尾
  pub async fn open_ongoing(
    path: impl AsRef<Path>,
    write_pos: u64,
    conf: ChunkConf,
  ) -> Result<Self> {
    let path = path.as_ref();
    let mut file = open_existing(path, true).await?;
    let size = file.metadata().await?.len();
    let mut header = read_header(&file, path, size).await?;
    if header.is_scavenged() {
      return Err(corrupt(path, "ongoing chunk cannot be scavenged"));
    }
    if write_pos > header.chunk_size() as u64 {
      return Err(corrupt(
        path,
        format!("writer position {write_pos} beyond chunk size {}", header.chunk_size()),
      ));
    }
    let end = HEADER_SIZE as u64 + write_pos;
    if size < end {
      return Err(corrupt(
        path,
        format!("file size {size} shorter than writer position {write_pos}"),
      ));
    }
    if size > end {
      warn!("truncating {} from {size} to {end}", path.display());
      truncate(path.to_path_buf(), end).await?;
    }
    if header.version() == VERSION_UNALIGNED {
      header = ChunkHeader::with_version(
        VERSION_ALIGNED,
        header.chunk_size(),
        header.start(),
        header.end(),
        false,
        header.id(),
      );
      file.write_all_at(header.as_bytes().to_vec(), 0).await.0?;
      file.sync_all().await?;
      info!("upgraded {} header to version {VERSION_ALIGNED}", path.display());
    }

    let md5 = hash_prefix(&file, end).await?;
    let mut chunk = Self::build(path.to_path_buf(), header, None, conf, false);
    chunk.set_sizes(write_pos, write_pos);
    chunk.file_size.store(end, Ordering::Release);
    *chunk.writer.get_mut() = Some(Writer {
      file,
      pos: end,
      md5,
      buf: Vec::new(),
      raw_len: None,
    });
    chunk.pool.fill(&chunk.path, chunk.conf.reader_count).await?;
    Ok(chunk)
  }
}
