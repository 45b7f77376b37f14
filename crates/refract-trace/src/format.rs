use crate::{TraceError, TraceResult};
use refract_protocol::{ResourceId, LOG_MAGIC, SERIALISE_VERSION};

// Header strings are length-prefixed and come from the captured application;
// bound them so a corrupt log cannot force pathological allocations.
pub(crate) const MAX_HEADER_STRING_BYTES: u32 = 64 * 1024;
pub(crate) const MAX_HEADER_STRING_COUNT: u32 = 1024;
pub(crate) const MAX_THUMBNAIL_BYTES: u32 = 16 * 1024 * 1024;
pub(crate) const MAX_CALLSTACK_DEPTH: u32 = 512;

/// Application metadata recorded when the instance was created, stored in
/// the log header and in the `DeviceInit` chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppInitParams {
    pub app_name: String,
    pub engine_name: String,
    pub app_version: u32,
    pub engine_version: u32,
    pub api_version: u32,
    pub layers: Vec<String>,
    pub extensions: Vec<String>,
    pub instance_id: ResourceId,
}

/// Backbuffer thumbnail embedded in the log header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

/// Everything in a log file before the chunk stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogHeader {
    pub params: AppInitParams,
    pub thumbnail: Option<Thumbnail>,
}

impl LogHeader {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&LOG_MAGIC);
        out.extend_from_slice(&SERIALISE_VERSION.to_le_bytes());

        encode_string(out, &self.params.app_name);
        encode_string(out, &self.params.engine_name);
        out.extend_from_slice(&self.params.app_version.to_le_bytes());
        out.extend_from_slice(&self.params.engine_version.to_le_bytes());
        out.extend_from_slice(&self.params.api_version.to_le_bytes());
        encode_string_list(out, &self.params.layers);
        encode_string_list(out, &self.params.extensions);
        out.extend_from_slice(&self.params.instance_id.raw().to_le_bytes());

        match &self.thumbnail {
            Some(thumb) => {
                out.extend_from_slice(&thumb.width.to_le_bytes());
                out.extend_from_slice(&thumb.height.to_le_bytes());
                out.extend_from_slice(&(thumb.jpeg.len() as u32).to_le_bytes());
                out.extend_from_slice(&thumb.jpeg);
            }
            None => {
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
            }
        }
    }

    /// Parse and validate a header. Returns the header and the offset of the
    /// first chunk. Fails without side effects on any mismatch, so an
    /// incompatible log leaves no partial state behind.
    pub fn decode(data: &[u8]) -> TraceResult<(Self, usize)> {
        let mut cursor = Cursor { data, offset: 0 };

        let magic = cursor.take(8)?;
        if magic != LOG_MAGIC {
            return Err(TraceError::InvalidMagic);
        }
        let version = cursor.u32()?;
        if version != SERIALISE_VERSION {
            return Err(TraceError::IncompatibleVersion {
                expected: SERIALISE_VERSION,
                got: version,
            });
        }

        let app_name = cursor.string()?;
        let engine_name = cursor.string()?;
        let app_version = cursor.u32()?;
        let engine_version = cursor.u32()?;
        let api_version = cursor.u32()?;
        let layers = cursor.string_list()?;
        let extensions = cursor.string_list()?;
        let instance_id = ResourceId::from_raw(cursor.u64()?);

        let thumb_width = cursor.u32()?;
        let thumb_height = cursor.u32()?;
        let thumb_len = cursor.u32()?;
        if thumb_len > MAX_THUMBNAIL_BYTES {
            return Err(TraceError::Corrupt("thumbnail length out of bounds"));
        }
        let thumbnail = if thumb_len > 0 {
            Some(Thumbnail {
                width: thumb_width,
                height: thumb_height,
                jpeg: cursor.take(thumb_len as usize)?.to_vec(),
            })
        } else {
            None
        };

        Ok((
            LogHeader {
                params: AppInitParams {
                    app_name,
                    engine_name,
                    app_version,
                    engine_version,
                    api_version,
                    layers,
                    extensions,
                    instance_id,
                },
                thumbnail,
            },
            cursor.offset,
        ))
    }
}

fn encode_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn encode_string_list(out: &mut Vec<u8>, list: &[String]) {
    out.extend_from_slice(&(list.len() as u32).to_le_bytes());
    for s in list {
        encode_string(out, s);
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> TraceResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(TraceError::Corrupt("header length overflow"))?;
        if end > self.data.len() {
            return Err(TraceError::Corrupt("truncated header"));
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self) -> TraceResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> TraceResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> TraceResult<String> {
        let len = self.u32()?;
        if len > MAX_HEADER_STRING_BYTES {
            return Err(TraceError::Corrupt("header string out of bounds"));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| TraceError::Corrupt("header string not utf-8"))
    }

    fn string_list(&mut self) -> TraceResult<Vec<String>> {
        let count = self.u32()?;
        if count > MAX_HEADER_STRING_COUNT {
            return Err(TraceError::Corrupt("header string list out of bounds"));
        }
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(self.string()?);
        }
        Ok(out)
    }
}
