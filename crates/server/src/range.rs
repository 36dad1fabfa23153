/// Inclusive byte span of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn chunk_size(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    Invalid,
    Unsatisfiable,
}

impl std::fmt::Display for RangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeError::Invalid => write!(f, "invalid range header"),
            RangeError::Unsatisfiable => write!(f, "range not satisfiable"),
        }
    }
}

impl std::error::Error for RangeError {}

/// Resolves a `bytes=<start>-<end>` header against a resource of `total`
/// bytes. Both bounds are optional: start defaults to 0 and end to the last
/// byte. An end past the resource is clamped. No header means the whole
/// resource.
pub fn byte_range_bounds(header: Option<&str>, total: u64) -> Result<ByteRange, RangeError> {
    let value = header.unwrap_or("bytes=0-").trim();
    let Some(range) = value.strip_prefix("bytes=") else {
        return Err(RangeError::Invalid);
    };
    if range.contains(',') {
        return Err(RangeError::Invalid);
    }
    let Some((start_str, end_str)) = range.split_once('-') else {
        return Err(RangeError::Invalid);
    };

    let start: u64 = parse_bound(start_str)?.unwrap_or(0);
    let end: Option<u64> = parse_bound(end_str)?;
    if let Some(end) = end {
        if end < start {
            return Err(RangeError::Invalid);
        }
    }

    if total == 0 || start >= total {
        return Err(RangeError::Unsatisfiable);
    }

    let last = total - 1;
    let end = end.map(|end| end.min(last)).unwrap_or(last);
    Ok(ByteRange { start, end })
}

fn parse_bound(value: &str) -> Result<Option<u64>, RangeError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| RangeError::Invalid)
}
