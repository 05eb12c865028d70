//! Request body compression.
//!
//! Compressors are stateless and shared: one singleton per encoding, resolved by
//! name through a [`CompressorRegistry`].

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, OnceLock};

use flate2::write::GzEncoder;

use crate::error::ConfigError;

/// Encoding name that disables compression.
pub const NONE: &str = "none";
pub const GZIP: &str = "gzip";

/// A compressing sink that must be finished to flush trailing bytes.
pub trait CompressedSink: Write {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

pub trait Compressor: Send + Sync + fmt::Debug {
    /// Value sent in `grpc-encoding` / `Content-Encoding`.
    fn encoding(&self) -> &str;

    fn wrap<'a>(&self, sink: &'a mut (dyn Write + Send)) -> Box<dyn CompressedSink + Send + 'a>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GzipCompressor;

impl<W: Write> CompressedSink for GzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        (*self).finish().map(|_| ())
    }
}

impl Compressor for GzipCompressor {
    fn encoding(&self) -> &str {
        GZIP
    }

    fn wrap<'a>(&self, sink: &'a mut (dyn Write + Send)) -> Box<dyn CompressedSink + Send + 'a> {
        Box::new(GzEncoder::new(sink, flate2::Compression::default()))
    }
}

/// Process-wide gzip singleton.
pub fn gzip() -> Arc<dyn Compressor> {
    static GZIP_COMPRESSOR: OnceLock<Arc<dyn Compressor>> = OnceLock::new();
    GZIP_COMPRESSOR
        .get_or_init(|| Arc::new(GzipCompressor))
        .clone()
}

/// Compress a complete payload in memory.
pub fn compress_to_vec(
    compressor: &dyn Compressor,
    write: impl FnOnce(&mut dyn Write) -> io::Result<()>,
) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut sink = compressor.wrap(&mut out);
        write(&mut sink)?;
        sink.finish()?;
    }
    Ok(out)
}

/// Name-keyed lookup of the available compressors.
#[derive(Clone)]
pub struct CompressorRegistry {
    compressors: BTreeMap<String, Arc<dyn Compressor>>,
}

impl CompressorRegistry {
    /// An empty registry. `none` always resolves even when nothing is registered.
    pub fn empty() -> Self {
        Self {
            compressors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, compressor: Arc<dyn Compressor>) -> &mut Self {
        self.compressors
            .insert(compressor.encoding().to_ascii_lowercase(), compressor);
        self
    }

    /// Resolve a compression method name; `none` (or an empty name) yields `None`.
    pub fn resolve(&self, name: &str) -> Result<Option<Arc<dyn Compressor>>, ConfigError> {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() || name == NONE {
            return Ok(None);
        }
        self.compressors
            .get(&name)
            .cloned()
            .map(Some)
            .ok_or(ConfigError::UnsupportedCompression(name))
    }

    pub fn encodings(&self) -> impl Iterator<Item = &str> {
        self.compressors.keys().map(String::as_str)
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(gzip());
        registry
    }
}

impl fmt::Debug for CompressorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.encodings()).finish()
    }
}
