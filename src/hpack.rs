//! HPACK header compression with differential encoding.
//!
//! The codec keeps one [`EncodingContext`] per direction: a dynamic table of
//! recently indexed headers (newest at index 1) and a reference set of
//! headers considered present in the current header block. A header block is
//! a sequence of [`Command`]s; running them through [`EncodingContext::process`]
//! on both peers keeps the two tables bit-for-bit synchronized.
//!
//! Index space: `1..=dynamic_len` addresses the dynamic table, newest first;
//! `dynamic_len+1..=dynamic_len+61` addresses the static table.

use std::collections::VecDeque;

use crate::error::H2Error;
use crate::huffman;

/// Size limit a fresh encoding context starts with.
pub const DEFAULT_TABLE_LIMIT: usize = 4096;

/// Eviction cascade cap: re-adding evicted-but-needed headers must settle
/// within this many passes or the block is unencodable.
const MAX_EVICTION_PASSES: usize = 10;

/// A single header name-value pair. Names are ASCII lowercase on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl Header {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Table-accounting size: name + value + 32 bytes of overhead.
    fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

// -- Static table --

/// Static table entries: (name, value), 1-indexed on the wire after the
/// dynamic entries.
const STATIC_TABLE: &[(&[u8], &[u8])] = &[
    (b":authority", b""),                   // 1
    (b":method", b"GET"),                   // 2
    (b":method", b"POST"),                  // 3
    (b":path", b"/"),                       // 4
    (b":path", b"/index.html"),             // 5
    (b":scheme", b"http"),                  // 6
    (b":scheme", b"https"),                 // 7
    (b":status", b"200"),                   // 8
    (b":status", b"204"),                   // 9
    (b":status", b"206"),                   // 10
    (b":status", b"304"),                   // 11
    (b":status", b"400"),                   // 12
    (b":status", b"404"),                   // 13
    (b":status", b"500"),                   // 14
    (b"accept-charset", b""),               // 15
    (b"accept-encoding", b"gzip, deflate"), // 16
    (b"accept-language", b""),              // 17
    (b"accept-ranges", b""),                // 18
    (b"accept", b""),                       // 19
    (b"access-control-allow-origin", b""),  // 20
    (b"age", b""),                          // 21
    (b"allow", b""),                        // 22
    (b"authorization", b""),                // 23
    (b"cache-control", b""),                // 24
    (b"content-disposition", b""),          // 25
    (b"content-encoding", b""),             // 26
    (b"content-language", b""),             // 27
    (b"content-length", b""),               // 28
    (b"content-location", b""),             // 29
    (b"content-range", b""),                // 30
    (b"content-type", b""),                 // 31
    (b"cookie", b""),                       // 32
    (b"date", b""),                         // 33
    (b"etag", b""),                         // 34
    (b"expect", b""),                       // 35
    (b"expires", b""),                      // 36
    (b"from", b""),                         // 37
    (b"host", b""),                         // 38
    (b"if-match", b""),                     // 39
    (b"if-modified-since", b""),            // 40
    (b"if-none-match", b""),                // 41
    (b"if-range", b""),                     // 42
    (b"if-unmodified-since", b""),          // 43
    (b"last-modified", b""),                // 44
    (b"link", b""),                         // 45
    (b"location", b""),                     // 46
    (b"max-forwards", b""),                 // 47
    (b"proxy-authenticate", b""),           // 48
    (b"proxy-authorization", b""),          // 49
    (b"range", b""),                        // 50
    (b"referer", b""),                      // 51
    (b"refresh", b""),                      // 52
    (b"retry-after", b""),                  // 53
    (b"server", b""),                       // 54
    (b"set-cookie", b""),                   // 55
    (b"strict-transport-security", b""),    // 56
    (b"transfer-encoding", b""),            // 57
    (b"user-agent", b""),                   // 58
    (b"vary", b""),                         // 59
    (b"via", b""),                          // 60
    (b"www-authenticate", b""),             // 61
];

/// Number of static table entries.
pub const STATIC_TABLE_LEN: usize = 61;

/// 1-based static position of an exact (name, value) match.
fn find_static(name: &[u8], value: &[u8]) -> Option<usize> {
    STATIC_TABLE
        .iter()
        .position(|(n, v)| *n == name && *v == value)
        .map(|i| i + 1)
}

/// 1-based static position of the first name match.
fn find_static_name(name: &[u8]) -> Option<usize> {
    STATIC_TABLE
        .iter()
        .position(|(n, _)| *n == name)
        .map(|i| i + 1)
}

// -- Integer primitive --

/// Append an N-bit-prefix integer. `pattern` carries the representation
/// bits above the prefix.
pub(crate) fn write_integer(buf: &mut Vec<u8>, value: usize, prefix_bits: u8, pattern: u8) {
    let max = (1usize << prefix_bits) - 1;
    if value < max {
        buf.push(pattern | value as u8);
        return;
    }
    buf.push(pattern | max as u8);
    let mut rest = value - max;
    while rest >= 128 {
        buf.push(0x80 | (rest & 0x7f) as u8);
        rest >>= 7;
    }
    buf.push(rest as u8);
}

/// Decode an N-bit-prefix integer. Returns (value, bytes consumed).
pub(crate) fn read_integer(buf: &[u8], prefix_bits: u8) -> Result<(usize, usize), H2Error> {
    let first = *buf
        .first()
        .ok_or_else(|| H2Error::Compression("truncated integer".into()))?;
    let max = (1u64 << prefix_bits) - 1;
    let mut value = u64::from(first) & max;
    if value < max {
        return Ok((value as usize, 1));
    }
    let mut shift = 0u32;
    for (i, &b) in buf[1..].iter().enumerate() {
        if shift > 28 {
            return Err(H2Error::Compression("integer exceeds 2^31-1".into()));
        }
        value += u64::from(b & 0x7f) << shift;
        shift += 7;
        if value > 0x7fff_ffff {
            return Err(H2Error::Compression("integer exceeds 2^31-1".into()));
        }
        if b & 0x80 == 0 {
            return Ok((value as usize, i + 2));
        }
    }
    Err(H2Error::Compression("truncated integer".into()))
}

// -- String primitive --

/// Append a string literal: 7-bit-prefix length, high bit set when the body
/// is Huffman coded.
pub(crate) fn write_string(buf: &mut Vec<u8>, data: &[u8], huffman_coded: bool) {
    if huffman_coded {
        let len = huffman::encoded_len(data);
        write_integer(buf, len, 7, 0x80);
        huffman::encode(data, buf);
    } else {
        write_integer(buf, data.len(), 7, 0x00);
        buf.extend_from_slice(data);
    }
}

/// Decode a string literal. Returns (bytes, consumed).
pub(crate) fn read_string(buf: &[u8]) -> Result<(Vec<u8>, usize), H2Error> {
    let coded = buf.first().is_some_and(|b| b & 0x80 != 0);
    let (len, n) = read_integer(buf, 7)?;
    let end = n + len;
    if buf.len() < end {
        return Err(H2Error::Compression("truncated string".into()));
    }
    let body = &buf[n..end];
    let data = if coded {
        huffman::decode(body)?
    } else {
        body.to_vec()
    };
    Ok((data, end))
}

// -- Commands --

/// How a literal representation interacts with the dynamic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexing {
    /// Emit and insert into the dynamic table and reference set.
    Incremental,
    /// Emit only.
    None,
    /// Emit only; intermediaries must also never index it.
    Never,
}

/// Header name of a literal command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Name {
    /// Combined-space index of an entry whose name is reused.
    Index(usize),
    Literal(Vec<u8>),
}

/// Encoding-context update carried in-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextUpdate {
    /// Empty the reference set.
    Reset,
    /// Lower (or raise, up to the settings cap) the dynamic table limit.
    NewMaxSize(usize),
}

/// One header-field representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Toggle the entry at a combined-space index in the reference set;
    /// index 0 empties the reference set.
    Indexed(usize),
    Literal {
        indexing: Indexing,
        name: Name,
        value: Vec<u8>,
    },
    Context(ContextUpdate),
}

impl Command {
    /// Append the wire form of this command.
    pub fn serialize(&self, buf: &mut Vec<u8>, huffman_coded: bool) {
        match self {
            Command::Indexed(index) => write_integer(buf, *index, 7, 0x80),
            Command::Literal {
                indexing,
                name,
                value,
            } => {
                let (prefix, pattern) = match indexing {
                    Indexing::Incremental => (6, 0x40),
                    Indexing::Never => (4, 0x10),
                    Indexing::None => (4, 0x00),
                };
                match name {
                    Name::Index(i) => write_integer(buf, *i, prefix, pattern),
                    Name::Literal(n) => {
                        write_integer(buf, 0, prefix, pattern);
                        write_string(buf, n, huffman_coded);
                    }
                }
                write_string(buf, value, huffman_coded);
            }
            Command::Context(ContextUpdate::Reset) => buf.push(0x30),
            Command::Context(ContextUpdate::NewMaxSize(size)) => {
                buf.push(0x20);
                write_integer(buf, *size, 7, 0x00);
            }
        }
    }

    /// Decode one command from the head of `buf`. Returns (command, consumed).
    pub fn parse(buf: &[u8]) -> Result<(Command, usize), H2Error> {
        let first = *buf
            .first()
            .ok_or_else(|| H2Error::Compression("empty command".into()))?;
        if first & 0x80 != 0 {
            let (index, n) = read_integer(buf, 7)?;
            return Ok((Command::Indexed(index), n));
        }
        if first & 0x40 != 0 {
            return Self::parse_literal(buf, 6, Indexing::Incremental);
        }
        if first & 0x20 != 0 {
            if first & 0x10 != 0 {
                return Ok((Command::Context(ContextUpdate::Reset), 1));
            }
            let (size, n) = read_integer(&buf[1..], 7)?;
            return Ok((Command::Context(ContextUpdate::NewMaxSize(size)), n + 1));
        }
        if first & 0x10 != 0 {
            return Self::parse_literal(buf, 4, Indexing::Never);
        }
        Self::parse_literal(buf, 4, Indexing::None)
    }

    fn parse_literal(
        buf: &[u8],
        prefix: u8,
        indexing: Indexing,
    ) -> Result<(Command, usize), H2Error> {
        let (index, mut at) = read_integer(buf, prefix)?;
        let name = if index == 0 {
            let (name, n) = read_string(&buf[at..])?;
            at += n;
            Name::Literal(name)
        } else {
            Name::Index(index)
        };
        let (value, n) = read_string(&buf[at..])?;
        at += n;
        Ok((
            Command::Literal {
                indexing,
                name,
                value,
            },
            at,
        ))
    }
}

// -- Encoding context --

/// A reference-set slot: either a 0-based dynamic-table position (renumbered
/// on every insertion, dropped on eviction) or a 1-based static position.
/// Static-backed entries let a block reference a static header without
/// copying it into the dynamic table, which keeps static indices stable
/// within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefPos {
    Dynamic(usize),
    Static(usize),
}

/// Per-direction compression state: dynamic table, reference set, and the
/// current/advertised size limits.
pub struct EncodingContext {
    /// Newest entry at the front (combined index 1).
    table: VecDeque<Header>,
    size: usize,
    limit: usize,
    /// Cap advertised via SETTINGS_HEADER_TABLE_SIZE; `limit` never exceeds it.
    settings_limit: usize,
    refset: Vec<(RefPos, Header)>,
}

impl EncodingContext {
    pub fn new(limit: usize) -> Self {
        Self {
            table: VecDeque::new(),
            size: 0,
            limit,
            settings_limit: limit,
            refset: Vec::new(),
        }
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    /// Sum of entry sizes currently held.
    pub fn table_size(&self) -> usize {
        self.size
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Entry at a 0-based dynamic position, newest first.
    pub fn entry(&self, position: usize) -> Option<&Header> {
        self.table.get(position)
    }

    /// Apply a new SETTINGS_HEADER_TABLE_SIZE cap, clamping the active limit.
    pub fn set_settings_limit(&mut self, cap: usize) {
        self.settings_limit = cap;
        if self.limit > cap {
            self.limit = cap;
            let mut evicted = Vec::new();
            self.shrink_to_limit(&mut evicted);
        }
    }

    /// Resolve a combined-space index to a header pair.
    pub fn resolve(&self, index: usize) -> Result<Header, H2Error> {
        if index == 0 {
            return Err(H2Error::Compression("zero header index".into()));
        }
        if let Some(h) = self.table.get(index - 1) {
            return Ok(h.clone());
        }
        let static_pos = index - self.table.len();
        if static_pos <= STATIC_TABLE_LEN {
            let (name, value) = STATIC_TABLE[static_pos - 1];
            return Ok(Header::new(name, value));
        }
        Err(H2Error::Compression(format!("header index {index} out of range")))
    }

    fn resolve_name(&self, index: usize) -> Result<Vec<u8>, H2Error> {
        self.resolve(index).map(|h| h.name)
    }

    fn refset_contains(&self, header: &Header) -> bool {
        self.refset.iter().any(|(_, h)| h == header)
    }

    /// Run one command against the table and reference set.
    ///
    /// Returns the header this command contributes to the block (if any) and
    /// the entries evicted from the table while making room. Failed calls
    /// leave the context untouched.
    pub fn process(&mut self, cmd: &Command) -> Result<(Option<Header>, Vec<Header>), H2Error> {
        match cmd {
            Command::Context(ContextUpdate::Reset) => {
                let evicted = self.refset.drain(..).map(|(_, h)| h).collect();
                Ok((None, evicted))
            }
            Command::Context(ContextUpdate::NewMaxSize(size)) => {
                if *size > self.settings_limit {
                    return Err(H2Error::Compression(format!(
                        "table limit {size} above advertised cap {}",
                        self.settings_limit
                    )));
                }
                self.limit = *size;
                let mut evicted = Vec::new();
                self.shrink_to_limit(&mut evicted);
                Ok((None, evicted))
            }
            Command::Indexed(0) => {
                let evicted = self.refset.drain(..).map(|(_, h)| h).collect();
                Ok((None, evicted))
            }
            Command::Indexed(index) => {
                let pos = self.ref_pos(*index)?;
                if let Some(at) = self.refset.iter().position(|(p, _)| *p == pos) {
                    // Already active: the command toggles it off.
                    self.refset.remove(at);
                    return Ok((None, Vec::new()));
                }
                let header = self.resolve(*index)?;
                self.refset.push((pos, header.clone()));
                Ok((Some(header), Vec::new()))
            }
            Command::Literal {
                indexing,
                name,
                value,
            } => {
                let name = match name {
                    Name::Index(i) => self.resolve_name(*i)?,
                    Name::Literal(n) => n.clone(),
                };
                let header = Header {
                    name,
                    value: value.clone(),
                };
                let evicted = if *indexing == Indexing::Incremental {
                    self.insert(header.clone())
                } else {
                    Vec::new()
                };
                Ok((Some(header), evicted))
            }
        }
    }

    fn ref_pos(&self, index: usize) -> Result<RefPos, H2Error> {
        if index <= self.table.len() {
            Ok(RefPos::Dynamic(index - 1))
        } else if index <= self.table.len() + STATIC_TABLE_LEN {
            Ok(RefPos::Static(index - self.table.len()))
        } else {
            Err(H2Error::Compression(format!("header index {index} out of range")))
        }
    }

    /// Insert at the front, evicting from the oldest end to stay within the
    /// limit. An entry larger than the whole limit clears the table and the
    /// reference set instead of being inserted.
    fn insert(&mut self, header: Header) -> Vec<Header> {
        let entry_size = header.size();
        let mut evicted = Vec::new();

        if entry_size > self.limit {
            while let Some(old) = self.table.pop_back() {
                self.size -= old.size();
                evicted.push(old);
            }
            for (_, h) in self.refset.drain(..) {
                if !evicted.contains(&h) {
                    evicted.push(h);
                }
            }
            return evicted;
        }

        while self.size + entry_size > self.limit {
            self.evict_oldest(&mut evicted);
        }
        for (pos, _) in self.refset.iter_mut() {
            if let RefPos::Dynamic(p) = pos {
                *pos = RefPos::Dynamic(*p + 1);
            }
        }
        self.size += entry_size;
        self.table.push_front(header.clone());
        self.refset.push((RefPos::Dynamic(0), header));
        evicted
    }

    fn evict_oldest(&mut self, evicted: &mut Vec<Header>) {
        let Some(old) = self.table.pop_back() else {
            return;
        };
        let stale = RefPos::Dynamic(self.table.len());
        self.size -= old.size();
        self.refset.retain(|(p, _)| *p != stale);
        evicted.push(old);
    }

    fn shrink_to_limit(&mut self, evicted: &mut Vec<Header>) {
        while self.size > self.limit {
            self.evict_oldest(evicted);
        }
    }

    /// Wire index of a reference-set entry at the current table length.
    fn wire_index(&self, pos: RefPos) -> usize {
        match pos {
            RefPos::Dynamic(p) => p + 1,
            RefPos::Static(s) => self.table.len() + s,
        }
    }
}

// -- Preprocessing / postprocessing --

/// Encode-side normalization: values of repeated names are joined with NUL
/// (`set-cookie` excepted), then `cookie` headers are split into one header
/// per crumb.
pub fn preprocess(headers: &[Header]) -> Vec<Header> {
    let mut combined: Vec<Header> = Vec::with_capacity(headers.len());
    for h in headers {
        let joinable = h.name != b"set-cookie";
        match combined
            .iter_mut()
            .find(|c| joinable && c.name == h.name)
        {
            Some(c) => {
                c.value.push(0);
                c.value.extend_from_slice(&h.value);
            }
            None => combined.push(h.clone()),
        }
    }

    let mut out = Vec::with_capacity(combined.len());
    for h in combined {
        if h.name == b"cookie" {
            for crumb in h.value.split(|&b| b == b';' || b == b' ' || b == 0) {
                if !crumb.is_empty() {
                    out.push(Header::new(&b"cookie"[..], crumb));
                }
            }
        } else {
            out.push(h);
        }
    }
    out
}

/// Decode-side normalization: crumbs of `cookie` are rejoined with `"; "`.
pub fn postprocess(headers: Vec<Header>) -> Vec<Header> {
    let mut out: Vec<Header> = Vec::with_capacity(headers.len());
    for h in headers {
        if h.name == b"cookie" {
            if let Some(c) = out.iter_mut().find(|c| c.name == b"cookie") {
                c.value.extend_from_slice(b"; ");
                c.value.extend_from_slice(&h.value);
                continue;
            }
        }
        out.push(h);
    }
    out
}

// -- Encoder --

/// Differential HPACK encoder for one direction.
pub struct Encoder {
    context: EncodingContext,
    huffman_coded: bool,
}

impl Encoder {
    pub fn new(limit: usize) -> Self {
        Self {
            context: EncodingContext::new(limit),
            huffman_coded: false,
        }
    }

    /// Enable Huffman coding of string literals.
    pub fn with_huffman(mut self) -> Self {
        self.huffman_coded = true;
        self
    }

    pub fn context(&self) -> &EncodingContext {
        &self.context
    }

    /// Apply a peer-advertised SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_settings_limit(&mut self, cap: usize) {
        self.context.set_settings_limit(cap);
    }

    /// Emit an in-band table-limit change ahead of the next header block.
    pub fn set_limit(&mut self, limit: usize, buf: &mut Vec<u8>) -> Result<(), H2Error> {
        let cmd = Command::Context(ContextUpdate::NewMaxSize(limit));
        self.context.process(&cmd)?;
        cmd.serialize(buf, self.huffman_coded);
        Ok(())
    }

    /// Encode a header list as a differential block against the current
    /// reference set, appending the wire bytes to `buf`.
    pub fn encode(&mut self, headers: &[Header], buf: &mut Vec<u8>) -> Result<(), H2Error> {
        let headers = preprocess(headers);
        let mut commands = Vec::new();

        // Headers active from earlier blocks but absent from this one are
        // toggled off first.
        let stale: Vec<(RefPos, Header)> = self
            .context
            .refset
            .iter()
            .filter(|(_, h)| !headers.contains(h))
            .cloned()
            .collect();
        for (pos, _) in stale {
            let cmd = Command::Indexed(self.context.wire_index(pos));
            self.context.process(&cmd)?;
            commands.push(cmd);
        }

        // Add what is missing; insertions may evict headers this block still
        // needs, so run to a fixed point with a bounded number of passes.
        let mut passes = 0;
        loop {
            let missing: Vec<Header> = headers
                .iter()
                .filter(|h| !self.context.refset_contains(h))
                .cloned()
                .collect();
            if missing.is_empty() {
                break;
            }
            passes += 1;
            if passes > MAX_EVICTION_PASSES {
                return Err(H2Error::Compression(
                    "eviction cascade did not stabilize".into(),
                ));
            }
            for header in missing {
                let cmd = self.best_command(&header);
                self.context.process(&cmd)?;
                commands.push(cmd);
            }
        }

        for cmd in &commands {
            cmd.serialize(buf, self.huffman_coded);
        }
        Ok(())
    }

    fn best_command(&self, header: &Header) -> Command {
        let dyn_len = self.context.table.len();
        if let Some(p) = self
            .context
            .table
            .iter()
            .position(|h| h == header)
        {
            return Command::Indexed(p + 1);
        }
        if let Some(s) = find_static(&header.name, &header.value) {
            return Command::Indexed(dyn_len + s);
        }
        let name = if let Some(p) = self
            .context
            .table
            .iter()
            .position(|h| h.name == header.name)
        {
            Name::Index(p + 1)
        } else if let Some(s) = find_static_name(&header.name) {
            Name::Index(dyn_len + s)
        } else {
            Name::Literal(header.name.clone())
        };
        Command::Literal {
            indexing: Indexing::Incremental,
            name,
            value: header.value.clone(),
        }
    }
}

// -- Decoder --

/// HPACK decoder for one direction.
pub struct Decoder {
    context: EncodingContext,
}

impl Decoder {
    pub fn new(limit: usize) -> Self {
        Self {
            context: EncodingContext::new(limit),
        }
    }

    pub fn context(&self) -> &EncodingContext {
        &self.context
    }

    /// Apply a locally-advertised SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_settings_limit(&mut self, cap: usize) {
        self.context.set_settings_limit(cap);
    }

    /// Decode a complete header block.
    ///
    /// Emissions come out in wire order; reference-set entries carried over
    /// from earlier blocks (and not touched by this one) follow them.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<Header>, H2Error> {
        let mut headers = Vec::new();
        let mut at = 0;
        while at < block.len() {
            let (cmd, n) = Command::parse(&block[at..])?;
            at += n;
            let (emitted, _) = self.context.process(&cmd)?;
            if let Some(h) = emitted {
                headers.push(h);
            }
        }
        for (_, h) in &self.context.refset {
            if !headers.contains(h) {
                headers.push(h.clone());
            }
        }
        Ok(postprocess(headers))
    }
}
