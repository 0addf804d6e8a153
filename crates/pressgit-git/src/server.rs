//! Git smart HTTP server, protocol v2.
//!
//! Serves a single read-only repository. Routes are matched by suffix so
//! the server can be mounted under any path prefix.
//! See: https://git-scm.com/docs/protocol-v2

use crate::pack::PackBuilder;
use crate::pktline::{decode_next, PktLine, PktLineWriter};
use crate::sideband::{encode_sideband, Channel};
use crate::transport::ResponseWriter;
use crate::{GitError, Result};
use bytes::Bytes;
use pressgit_storage::{AddedObject, ObjectId, ObjectType, Reference, Repository, HEADS_PREFIX};
use std::collections::{BTreeMap, HashSet};

/// Agent string sent by default by both client and server.
pub const DEFAULT_AGENT: &str = concat!("pressgit/", env!("CARGO_PKG_VERSION"));

const UPLOAD_PACK: &str = "git-upload-pack";
const RECEIVE_PACK: &str = "git-receive-pack";

/// Server behaviour knobs.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Value of the `agent` capability.
    pub agent: String,
    /// Send a progress summary on side-band channel 2.
    pub progress: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            agent: DEFAULT_AGENT.to_string(),
            progress: true,
        }
    }
}

/// An inbound HTTP request, reduced to what the git routes need.
#[derive(Debug, Clone, Default)]
pub struct GitRequest {
    /// Request path without the query string.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Value of the `Git-Protocol` header, if any.
    pub git_protocol: Option<String>,
    /// Request body.
    pub body: Bytes,
}

impl GitRequest {
    /// Creates a request from a path that may carry a query string.
    pub fn new(path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path_and_query, None),
        };
        Self {
            path: path.to_string(),
            query,
            ..Self::default()
        }
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the `Git-Protocol` header value.
    pub fn with_git_protocol(mut self, value: impl Into<String>) -> Self {
        self.git_protocol = Some(value.into());
        self
    }

    /// Returns a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.as_deref().and_then(|q| {
            q.split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    /// Whether the client asked for protocol v2.
    pub fn wants_v2(&self) -> bool {
        self.git_protocol
            .as_deref()
            .map(|value| value.split(':').any(|p| p.trim() == "version=2"))
            .unwrap_or(false)
    }
}

/// A parsed protocol v2 request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolMessage {
    /// Capability lines before the delimiter, `key` → `value` (empty when bare).
    pub capabilities: BTreeMap<String, String>,
    /// Argument lines after the delimiter, `key` → values in order.
    pub arguments: BTreeMap<String, Vec<String>>,
}

impl ProtocolMessage {
    /// The requested command.
    pub fn command(&self) -> Option<&str> {
        self.capabilities.get("command").map(String::as_str)
    }

    /// Values of an argument.
    pub fn values(&self, key: &str) -> &[String] {
        self.arguments.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a bare argument was sent.
    pub fn flag(&self, key: &str) -> bool {
        self.arguments.contains_key(key)
    }
}

/// Parses a protocol v2 request body.
///
/// Capabilities are `key[=value]` lines up to the delimiter, arguments are
/// `key[ value]` lines up to the flush.
pub fn parse_message(body: &[u8]) -> Result<ProtocolMessage> {
    let mut message = ProtocolMessage::default();
    let mut cursor = 0;
    let mut in_arguments = false;
    loop {
        let pkt = decode_next(body, &mut cursor)?;
        let line = match pkt {
            None | Some(PktLine::Flush) | Some(PktLine::ResponseEnd) => break,
            Some(PktLine::Delimiter) => {
                if in_arguments {
                    return Err(GitError::Protocol("second delimiter in request".to_string()));
                }
                in_arguments = true;
                continue;
            }
            Some(pkt) => pkt
                .as_str()
                .ok_or_else(|| GitError::Protocol("request line is not utf-8".to_string()))?
                .to_string(),
        };
        if in_arguments {
            let (key, value) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            message
                .arguments
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        } else {
            let (key, value) = line.split_once('=').unwrap_or((line.as_str(), ""));
            message
                .capabilities
                .insert(key.to_string(), value.to_string());
        }
    }
    Ok(message)
}

/// A `filter` argument of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobFilter {
    /// Omit every blob.
    NoBlobs,
    /// Omit blobs larger than this many bytes.
    Limit(u64),
}

impl BlobFilter {
    /// Parses `blob:none` or `blob:limit=<n>[kmg]`.
    pub fn parse(spec: &str) -> Result<Self> {
        if spec == "blob:none" {
            return Ok(Self::NoBlobs);
        }
        let limit = spec
            .strip_prefix("blob:limit=")
            .ok_or_else(|| GitError::UnsupportedFilter(spec.to_string()))?;
        let (digits, scale) = match limit.char_indices().last() {
            Some((i, 'k')) | Some((i, 'K')) => (&limit[..i], 1u64 << 10),
            Some((i, 'm')) | Some((i, 'M')) => (&limit[..i], 1 << 20),
            Some((i, 'g')) | Some((i, 'G')) => (&limit[..i], 1 << 30),
            _ => (limit, 1),
        };
        digits
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(scale))
            .map(Self::Limit)
            .ok_or_else(|| GitError::UnsupportedFilter(spec.to_string()))
    }

    fn keeps_blob(&self, size: usize) -> bool {
        match self {
            Self::NoBlobs => false,
            Self::Limit(limit) => size as u64 <= *limit,
        }
    }
}

/// Serves one repository over the smart HTTP protocol.
#[derive(Debug, Clone)]
pub struct GitServer {
    repo: Repository,
    options: ServerOptions,
}

impl GitServer {
    /// Creates a server with default options.
    pub fn new(repo: Repository) -> Self {
        Self::with_options(repo, ServerOptions::default())
    }

    /// Creates a server with explicit options.
    pub fn with_options(repo: Repository, options: ServerOptions) -> Self {
        Self { repo, options }
    }

    /// The served repository.
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Routes one request.
    ///
    /// Nothing is written to `response` when an error is returned, so the
    /// caller can still choose the status.
    pub fn handle_request(
        &self,
        request: &GitRequest,
        response: &mut dyn ResponseWriter,
    ) -> Result<()> {
        let path = request.path.trim_end_matches('/');
        let (content_type, body) = if path.ends_with("/HEAD") || path == "HEAD" {
            ("text/plain", self.head_file()?)
        } else if path.ends_with("/info/refs") {
            match request.query_param("service") {
                Some(UPLOAD_PACK) => {}
                Some(other) => return Err(GitError::UnsupportedService(other.to_string())),
                None => {
                    return Err(GitError::UnsupportedService(
                        "dumb http is not supported".to_string(),
                    ))
                }
            }
            let body = if request.wants_v2() {
                self.capability_advertisement()?
            } else {
                self.ref_advertisement()?
            };
            ("application/x-git-upload-pack-advertisement", body)
        } else if path.ends_with(&format!("/{}", UPLOAD_PACK)) {
            let message = parse_message(&request.body)?;
            let body = match message.command() {
                Some("ls-refs") => self.handle_ls_refs(&message)?,
                Some("fetch") => self.handle_fetch(&message)?,
                Some(other) => {
                    return Err(GitError::Protocol(format!("unknown command: {}", other)))
                }
                None => {
                    return Err(GitError::Protocol(
                        "missing command, protocol v2 is required".to_string(),
                    ))
                }
            };
            ("application/x-git-upload-pack-result", body)
        } else if path.ends_with(&format!("/{}", RECEIVE_PACK)) {
            return Err(GitError::UnsupportedService(RECEIVE_PACK.to_string()));
        } else {
            return Err(GitError::UnsupportedService(request.path.clone()));
        };

        response.set_status(200);
        response.send_header("Content-Type", content_type);
        response.send_header("Cache-Control", "no-cache");
        response.write(&body)?;
        response.end()
    }

    fn head_file(&self) -> Result<Vec<u8>> {
        Ok(self.repo.storage().read_file("HEAD")?.to_vec())
    }

    /// The protocol v2 capability advertisement.
    pub fn capability_advertisement(&self) -> Result<Vec<u8>> {
        let mut writer = PktLineWriter::new(Vec::new());
        writer.write_line(&format!("# service={}", UPLOAD_PACK))?;
        writer.flush_pkt()?;
        writer.write_line("version 2")?;
        writer.write_line(&format!("agent={}", self.options.agent))?;
        writer.write_line("ls-refs=unborn")?;
        writer.write_line("fetch=shallow filter")?;
        writer.write_line("object-format=sha1")?;
        writer.flush_pkt()?;
        Ok(writer.into_inner())
    }

    /// A protocol v0 ref advertisement with capabilities on the first line.
    pub fn ref_advertisement(&self) -> Result<Vec<u8>> {
        let mut lines = Vec::new();
        if let Some(head) = self.repo.head()? {
            lines.push((head, "HEAD".to_string()));
        }
        for (name, reference) in self.repo.refs().list_refs(&["refs/"])? {
            if let Reference::Direct(id) = reference {
                lines.push((id, name));
            }
        }

        let mut capabilities = format!(
            "side-band-64k ofs-delta shallow filter agent={}",
            self.options.agent
        );
        if let Some(branch) = self.repo.refs().current_branch() {
            capabilities = format!("symref=HEAD:{}{} {}", HEADS_PREFIX, branch, capabilities);
        }

        let mut writer = PktLineWriter::new(Vec::new());
        writer.write_line(&format!("# service={}", UPLOAD_PACK))?;
        writer.flush_pkt()?;
        match lines.split_first() {
            Some(((id, name), rest)) => {
                writer.write(&PktLine::from_string(&format!(
                    "{} {}\0{}\n",
                    id, name, capabilities
                )))?;
                for (id, name) in rest {
                    writer.write_line(&format!("{} {}", id, name))?;
                }
            }
            None => {
                writer.write(&PktLine::from_string(&format!(
                    "{} capabilities^{{}}\0{}\n",
                    ObjectId::NULL,
                    capabilities
                )))?;
            }
        }
        writer.flush_pkt()?;
        Ok(writer.into_inner())
    }

    /// Answers an `ls-refs` command.
    pub fn handle_ls_refs(&self, message: &ProtocolMessage) -> Result<Vec<u8>> {
        let prefixes: Vec<&str> = message
            .values("ref-prefix")
            .iter()
            .map(String::as_str)
            .collect();
        let symrefs = message.flag("symrefs");
        let unborn = message.flag("unborn");

        let mut writer = PktLineWriter::new(Vec::new());
        let mut advertised = 0usize;
        for (name, reference) in self.repo.refs().list_refs(&prefixes)? {
            match reference {
                Reference::Direct(id) => {
                    writer.write_line(&format!("{} {}", id, name))?;
                    advertised += 1;
                }
                Reference::Symbolic(target) => match self.repo.refs().try_get_ref(&target)? {
                    Some(id) if symrefs => {
                        writer.write_line(&format!("{} {} symref-target:{}", id, name, target))?;
                        advertised += 1;
                    }
                    Some(id) => {
                        writer.write_line(&format!("{} {}", id, name))?;
                        advertised += 1;
                    }
                    None if unborn => {
                        writer.write_line(&format!("unborn {} symref-target:{}", name, target))?;
                        advertised += 1;
                    }
                    None => {}
                },
            }
        }
        writer.flush_pkt()?;
        tracing::info!(refs = advertised, prefixes = ?prefixes, "ls-refs");
        Ok(writer.into_inner())
    }

    /// Answers a `fetch` command.
    pub fn handle_fetch(&self, message: &ProtocolMessage) -> Result<Vec<u8>> {
        let wants = parse_ids(message.values("want"))?;
        if wants.is_empty() {
            return Err(GitError::Protocol(
                "fetch requires at least one want".to_string(),
            ));
        }
        let haves = parse_ids(message.values("have"))?;
        let filter = message
            .values("filter")
            .last()
            .map(|spec| BlobFilter::parse(spec))
            .transpose()?;
        let deepen = message
            .values("deepen")
            .last()
            .map(|depth| {
                depth
                    .parse::<usize>()
                    .ok()
                    .filter(|&d| d > 0)
                    .ok_or_else(|| GitError::Protocol(format!("invalid deepen: {}", depth)))
            })
            .transpose()?;

        let objects = self.repo.objects();
        let common: HashSet<ObjectId> = haves
            .iter()
            .copied()
            .filter(|id| objects.contains(id))
            .collect();

        let mut selected: Vec<AddedObject> = Vec::new();
        let mut seen = HashSet::new();
        let mut shallow = Vec::new();
        for want in &wants {
            if !objects.contains(want) {
                return Err(GitError::Protocol(format!("not our ref {}", want)));
            }
            if seen.contains(want) {
                continue;
            }
            let mut added = Vec::new();
            match objects.object_type(want)? {
                ObjectType::Commit => {
                    for (commit, base) in self.walk_history(*want, &common, deepen, &mut shallow)? {
                        for object in objects.find_objects_added_in(commit, base) {
                            added.push(object?);
                        }
                    }
                }
                _ => {
                    for object in objects.find_objects_added_in(*want, None) {
                        added.push(object?);
                    }
                }
            }
            for object in added {
                if !seen.insert(object.id) {
                    continue;
                }
                let keep = match (object.object_type, filter) {
                    (ObjectType::Blob, Some(filter)) if !wants.contains(&object.id) => {
                        filter.keeps_blob(objects.object_size(&object.id)?)
                    }
                    _ => true,
                };
                if keep {
                    selected.push(object);
                }
            }
        }

        let mut builder = PackBuilder::new();
        for object in &selected {
            builder.add_from_store(objects, &object.id)?;
        }
        let pack = builder.build()?;

        let mut out = PktLineWriter::new(Vec::new());
        if !haves.is_empty() {
            out.write_line("acknowledgments")?;
            let mut acked = false;
            for have in &haves {
                if common.contains(have) {
                    out.write_line(&format!("ACK {}", have))?;
                    acked = true;
                }
            }
            if !acked {
                out.write_line("NAK")?;
            }
            out.write_line("ready")?;
            out.delim_pkt()?;
        }
        if !shallow.is_empty() {
            out.write_line("shallow-info")?;
            for id in &shallow {
                out.write_line(&format!("shallow {}", id))?;
            }
            out.delim_pkt()?;
        }
        out.write_line("packfile")?;
        let mut body = out.into_inner();
        if self.options.progress {
            body.extend(encode_sideband(
                Channel::Progress,
                format!("Total {} objects\n", selected.len()).as_bytes(),
            ));
        }
        body.extend(encode_sideband(Channel::Pack, &pack));
        body.extend(PktLine::Flush.encode());

        tracing::info!(
            wants = wants.len(),
            haves = haves.len(),
            common = common.len(),
            objects = selected.len(),
            shallow = shallow.len(),
            pack_bytes = pack.len(),
            "fetch"
        );
        Ok(body)
    }

    /// Walks first-parent history from `tip`, pairing each commit with the
    /// commit the client already has to diff against.
    ///
    /// Stops at a common commit, the root, or the depth limit; commits whose
    /// parent lies past the limit are recorded as shallow.
    fn walk_history(
        &self,
        tip: ObjectId,
        common: &HashSet<ObjectId>,
        deepen: Option<usize>,
        shallow: &mut Vec<ObjectId>,
    ) -> Result<Vec<(ObjectId, Option<ObjectId>)>> {
        let objects = self.repo.objects();
        let mut chain = Vec::new();
        let mut current = Some(tip);
        while let Some(id) = current {
            if common.contains(&id) || deepen.is_some_and(|limit| chain.len() >= limit) {
                break;
            }
            let parent = objects.read_commit(&id)?.parent();
            chain.push((id, parent));
            current = parent;
        }

        let walked: HashSet<ObjectId> = chain.iter().map(|(id, _)| *id).collect();
        Ok(chain
            .into_iter()
            .map(|(id, parent)| match parent {
                Some(p) if common.contains(&p) || walked.contains(&p) => (id, Some(p)),
                Some(_) => {
                    if !shallow.contains(&id) {
                        shallow.push(id);
                    }
                    (id, None)
                }
                None => (id, None),
            })
            .collect())
    }
}

fn parse_ids(values: &[String]) -> Result<Vec<ObjectId>> {
    values
        .iter()
        .map(|value| {
            let hex = value.split_whitespace().next().unwrap_or_default();
            ObjectId::from_hex(hex)
                .map_err(|_| GitError::Protocol(format!("invalid object id: {}", value)))
        })
        .collect()
}
