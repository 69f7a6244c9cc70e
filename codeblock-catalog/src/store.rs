//! RocksDB-backed code block catalog.
//!
//! Column families:
//! - `code_blocks` — one bincode-encoded [`CodeBlock`] per exercise, keyed by
//!   its 16-byte UUID
//!
//! Rating submissions are read-modify-write; they are serialized through an
//! in-process write lock so concurrent submissions never lose an update.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteOptions,
};
use uuid::Uuid;

use crate::error::CatalogError;
use crate::model::{default_code_blocks, CodeBlock, NewCodeBlock, RatingSummary};

/// Column family names.
const CF_CODE_BLOCKS: &str = "code_blocks";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 32MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("codeblock_data"),
            block_cache_size: 32 * 1024 * 1024, // 32MB
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024, // 4MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

pub struct CatalogStore {
    /// RocksDB instance
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes read-modify-write sequences
    write_lock: Mutex<()>,
}

impl CatalogStore {
    /// Open the catalog at the configured path, creating it if missing.
    pub fn open(config: StoreConfig) -> Result<Self, CatalogError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let mut cf_opts = Options::default();
        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        cf_opts.set_block_based_table_factory(&block_opts);
        cf_opts.set_compression_type(DBCompressionType::Lz4);

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            vec![ColumnFamilyDescriptor::new(CF_CODE_BLOCKS, cf_opts)],
        )?;

        log::info!("Catalog store opened at {}", config.path.display());
        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    /// Create and persist a new code block.
    pub fn insert(&self, fields: NewCodeBlock) -> Result<CodeBlock, CatalogError> {
        let block = CodeBlock::new(fields);
        self.put(&block)?;
        Ok(block)
    }

    /// Persist a code block, replacing any previous version.
    pub fn put(&self, block: &CodeBlock) -> Result<(), CatalogError> {
        let cf = self.cf()?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .put_cf_opt(&cf, block.id.as_bytes(), encode(block)?, &write_opts)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<CodeBlock, CatalogError> {
        let cf = self.cf()?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(CatalogError::NotFound(id.to_string())),
        }
    }

    /// Look up by the string form used in URLs and session ids.
    pub fn get_by_str(&self, id: &str) -> Result<CodeBlock, CatalogError> {
        let id = Uuid::parse_str(id).map_err(|_| CatalogError::NotFound(id.to_string()))?;
        self.get(id)
    }

    /// All code blocks, ordered by name.
    pub fn list(&self) -> Result<Vec<CodeBlock>, CatalogError> {
        let cf = self.cf()?;
        let mut blocks = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            blocks.push(decode(&value)?);
        }
        blocks.sort_by(|a, b| a.code_block_name.cmp(&b.code_block_name));
        Ok(blocks)
    }

    pub fn rating(&self, id: Uuid) -> Result<RatingSummary, CatalogError> {
        Ok(self.get(id)?.rating_summary())
    }

    /// Add a 1..=5 rating and return the new aggregate.
    pub fn submit_rating(&self, id: Uuid, rating: i64) -> Result<RatingSummary, CatalogError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut block = self.get(id)?;
        let summary = block.record_rating(rating)?;
        self.put(&block)?;
        log::debug!("Rating {rating} recorded for code block {id}");
        Ok(summary)
    }

    /// Insert the starter exercises if the catalog is empty. Returns how many
    /// were inserted.
    pub fn seed_defaults(&self) -> Result<usize, CatalogError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.is_empty()? {
            return Ok(0);
        }
        let defaults = default_code_blocks();
        let count = defaults.len();
        for fields in defaults {
            self.insert(fields)?;
        }
        log::info!("Catalog seeded with {count} code blocks");
        Ok(count)
    }

    pub fn len(&self) -> Result<usize, CatalogError> {
        let cf = self.cf()?;
        let mut count = 0;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, CatalogError> {
        let cf = self.cf()?;
        match self.db.iterator_cf(&cf, IteratorMode::Start).next() {
            Some(item) => item.map(|_| false).map_err(CatalogError::from),
            None => Ok(true),
        }
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, CatalogError> {
        self.db
            .cf_handle(CF_CODE_BLOCKS)
            .ok_or_else(|| CatalogError::Database(format!("Column family '{CF_CODE_BLOCKS}' not found")))
    }
}

fn encode(block: &CodeBlock) -> Result<Vec<u8>, CatalogError> {
    bincode::serde::encode_to_vec(block, bincode::config::standard())
        .map_err(|e| CatalogError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<CodeBlock, CatalogError> {
    let (block, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| CatalogError::Deserialization(e.to_string()))?;
    Ok(block)
}
