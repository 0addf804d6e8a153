//! Git smart HTTP client, protocol v2.
//!
//! Drives `ls-refs` and `fetch` against `git-upload-pack`, and pushes single
//! commits to `git-receive-pack`.

use crate::pack::{PackBuilder, PackObject, PackParser};
use crate::pktline::{decode_all, decode_next, PktLine, PktLineWriter};
use crate::server::DEFAULT_AGENT;
use crate::sideband::{collect_pack_data, demultiplex_sideband, Channel};
use crate::transport::{read_response, HttpRequest, HttpTransport};
use crate::{GitError, Result};
use bytes::Bytes;
use pressgit_storage::{
    ObjectId, ObjectStore, ObjectType, Repository, StorageError, HEADS_PREFIX, REMOTES_PREFIX,
};
use std::collections::BTreeMap;

/// Where the client is in an exchange with the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No exchange in progress.
    Idle,
    /// Refs were listed.
    RefsListed,
    /// A fetch or push request is in flight.
    Negotiating,
    /// A pack was received and decoded.
    PackReceived,
    /// A push was accepted.
    Pushed,
}

/// Client behaviour knobs.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Value of the `agent` capability.
    pub agent: String,
    /// Name used for `refs/remotes/<name>/…` tracking refs.
    pub remote_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            agent: DEFAULT_AGENT.to_string(),
            remote_name: "origin".to_string(),
        }
    }
}

/// Arguments of a `fetch` command.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    /// Objects to fetch.
    pub wants: Vec<ObjectId>,
    /// Objects the client already has.
    pub haves: Vec<ObjectId>,
    /// Object filter, e.g. `blob:none`.
    pub filter: Option<String>,
    /// Limit on commit history depth.
    pub deepen: Option<u32>,
}

/// The parsed response to a `fetch` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    /// Haves the server acknowledged as common.
    pub acknowledged: Vec<ObjectId>,
    /// Whether the server declared itself ready to send the pack.
    pub ready: bool,
    /// Commits the server marked shallow.
    pub shallow: Vec<ObjectId>,
    /// Raw pack bytes.
    pub pack: Vec<u8>,
}

/// Result of [`GitClient::force_pull`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    /// The remote commit now recorded in the tracking ref.
    pub commit: ObjectId,
    /// Tree (or blob) found at the pulled path.
    pub tree: ObjectId,
    /// Blobs downloaded.
    pub fetched_blobs: usize,
    /// Trees copied into the local store.
    pub copied_trees: usize,
}

/// Result of [`GitClient::force_push_one_commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    /// The pushed commit.
    pub commit: ObjectId,
    /// Previous remote tip, if the branch existed.
    pub previous: Option<ObjectId>,
    /// Objects sent in the pack.
    pub objects: usize,
}

type ProgressCallback = Box<dyn FnMut(&str) + Send>;

/// Client for one remote repository.
pub struct GitClient<T> {
    url: String,
    transport: T,
    options: ClientOptions,
    state: ClientState,
    progress: Option<ProgressCallback>,
}

impl<T: HttpTransport> GitClient<T> {
    /// Creates a client for the repository at `url`.
    pub fn new(url: impl Into<String>, transport: T) -> Self {
        Self::with_options(url, transport, ClientOptions::default())
    }

    /// Creates a client with explicit options.
    pub fn with_options(url: impl Into<String>, transport: T, options: ClientOptions) -> Self {
        let url: String = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            transport,
            options,
            state: ClientState::Idle,
            progress: None,
        }
    }

    /// Receives remote progress messages.
    pub fn on_progress(&mut self, callback: impl FnMut(&str) + Send + 'static) {
        self.progress = Some(Box::new(callback));
    }

    /// Remote URL without a trailing slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Client options.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn transition(&mut self, next: ClientState) {
        if self.state != next {
            tracing::debug!(remote = %self.url, from = ?self.state, to = ?next, "Client state");
            self.state = next;
        }
    }

    /// Runs one operation, moving to `done` on success and back to idle on failure.
    fn run<R>(&mut self, done: ClientState, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let result = op(self);
        match &result {
            Ok(_) => self.transition(done),
            Err(e) => {
                tracing::warn!(remote = %self.url, error = %e, "Remote operation failed");
                self.transition(ClientState::Idle);
            }
        }
        result
    }

    fn post(&self, service: &str, body: Vec<u8>, protocol_v2: bool) -> Result<Bytes> {
        let url = format!("{}/{}", self.url, service);
        let mut request = HttpRequest::post(url.clone(), body)
            .header("Content-Type", format!("application/x-{}-request", service))
            .header("Accept", format!("application/x-{}-result", service))
            .header("User-Agent", self.options.agent.clone());
        if protocol_v2 {
            request = request.header("Git-Protocol", "version=2");
        }
        let response = read_response(&url, self.transport.execute(request))?;
        Ok(response.body)
    }

    fn command_header(&self, writer: &mut PktLineWriter<Vec<u8>>, command: &str) -> Result<()> {
        writer.write_line(&format!("command={}", command))?;
        writer.write_line(&format!("agent={}", self.options.agent))?;
        writer.write_line("object-format=sha1")?;
        writer.delim_pkt()
    }

    /// Lists remote refs under `prefix`.
    ///
    /// When `repo` is given, every `refs/heads/<name>` returned is recorded as
    /// `refs/remotes/<remote>/<name>`.
    pub fn fetch_refs(
        &mut self,
        prefix: &str,
        repo: Option<&Repository>,
    ) -> Result<BTreeMap<String, ObjectId>> {
        self.run(ClientState::RefsListed, |client| {
            let mut writer = PktLineWriter::new(Vec::new());
            client.command_header(&mut writer, "ls-refs")?;
            writer.write_line("peel")?;
            writer.write_line("symrefs")?;
            writer.write_line(&format!("ref-prefix {}", prefix))?;
            writer.flush_pkt()?;

            let body = client.post("git-upload-pack", writer.into_inner(), true)?;
            let refs = parse_ls_refs(&body)?;
            if let Some(repo) = repo {
                client.update_tracking_refs(repo, &refs)?;
            }
            tracing::info!(remote = %client.url, prefix, refs = refs.len(), "Listed refs");
            Ok(refs)
        })
    }

    /// Records remote branches as tracking refs.
    pub fn update_tracking_refs(
        &self,
        repo: &Repository,
        refs: &BTreeMap<String, ObjectId>,
    ) -> Result<usize> {
        let mut updated = 0;
        for (name, id) in refs {
            if let Some(branch) = name.strip_prefix(HEADS_PREFIX) {
                repo.refs().set_ref(&self.tracking_ref(branch), *id)?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn tracking_ref(&self, branch: &str) -> String {
        format!("{}{}/{}", REMOTES_PREFIX, self.options.remote_name, branch)
    }

    /// Sends a `fetch` command and returns the parsed response.
    pub fn fetch(&mut self, request: &FetchRequest) -> Result<FetchResponse> {
        if request.wants.is_empty() {
            return Err(GitError::Protocol("nothing to fetch".to_string()));
        }
        self.transition(ClientState::Negotiating);
        self.run(ClientState::PackReceived, |client| {
            let mut writer = PktLineWriter::new(Vec::new());
            client.command_header(&mut writer, "fetch")?;
            writer.write_line("ofs-delta")?;
            for want in &request.wants {
                writer.write_line(&format!("want {}", want))?;
            }
            for have in &request.haves {
                writer.write_line(&format!("have {}", have))?;
            }
            if let Some(filter) = &request.filter {
                writer.write_line(&format!("filter {}", filter))?;
            }
            if let Some(depth) = request.deepen {
                writer.write_line(&format!("deepen {}", depth))?;
            }
            writer.write_line("done")?;
            writer.flush_pkt()?;

            let body = client.post("git-upload-pack", writer.into_inner(), true)?;
            let remote = client.url.clone();
            let progress = &mut client.progress;
            let response = parse_fetch_response(&body, |message| {
                tracing::info!(remote = %remote, "remote: {}", message);
                if let Some(callback) = progress.as_mut() {
                    callback(message);
                }
            })?;
            tracing::info!(
                remote = %client.url,
                wants = request.wants.len(),
                pack_bytes = response.pack.len(),
                "Fetched pack"
            );
            Ok(response)
        })
    }

    /// Fetches a commit and all of its trees, without blobs or history, into
    /// a scratch in-memory store.
    pub fn list_objects(&mut self, tip: ObjectId) -> Result<ObjectStore> {
        let response = self.fetch(&FetchRequest {
            wants: vec![tip],
            filter: Some("blob:none".to_string()),
            deepen: Some(1),
            ..FetchRequest::default()
        })?;
        let store = ObjectStore::in_memory();
        PackParser::new(&response.pack).decode_into(&store)?;
        Ok(store)
    }

    /// Fetches exactly the given objects.
    pub fn fetch_objects(
        &mut self,
        wants: &[ObjectId],
        filter: Option<&str>,
    ) -> Result<Vec<PackObject>> {
        let response = self.fetch(&FetchRequest {
            wants: wants.to_vec(),
            filter: filter.map(str::to_string),
            ..FetchRequest::default()
        })?;
        PackParser::new(&response.pack).decode()
    }

    /// Makes the local copy of `path` on the remote `branch` match the remote,
    /// downloading only blobs the local store lacks.
    ///
    /// The remote tip is recorded in `refs/remotes/<remote>/<branch>`; local
    /// branches are not touched.
    pub fn force_pull(&mut self, repo: &Repository, branch: &str, path: &str) -> Result<PullOutcome> {
        let result = self.pull_path(repo, branch, path);
        if result.is_err() {
            self.transition(ClientState::Idle);
        }
        result
    }

    fn pull_path(&mut self, repo: &Repository, branch: &str, path: &str) -> Result<PullOutcome> {
        let remote_ref = format!("{}{}", HEADS_PREFIX, branch);
        let refs = self.fetch_refs(&remote_ref, None)?;
        let tip = *refs
            .get(&remote_ref)
            .ok_or_else(|| StorageError::RefNotFound(format!("{} on {}", remote_ref, self.url)))?;

        let remote = self.list_objects(tip)?;
        let root = remote.read_commit(&tip)?.tree;
        let path = path.trim_matches('/');
        let remote_sub = remote
            .read_by_path(&root, path)?
            .ok_or_else(|| StorageError::PathNotFound(path.to_string()))?
            .oid;

        let local = repo.objects();
        let tracking = self.tracking_ref(branch);
        // Earlier pulls may have copied other paths only; whatever is not in
        // the local store is compared as absent and fetched again.
        let local_sub = match repo.refs().try_get_ref(&tracking)? {
            Some(previous) if local.contains(&previous) => {
                let tree = local.read_commit(&previous)?.tree;
                match local.read_by_path(&tree, path) {
                    Ok(entry) => entry.map(|entry| entry.oid),
                    Err(StorageError::ObjectNotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                }
            }
            _ => None,
        };

        let mut missing_blobs = Vec::new();
        let mut trees = Vec::new();
        for added in remote
            .find_objects_added_in(remote_sub, local_sub)
            .with_old_store(local)
            .exhaustive()
        {
            let added = added?;
            match added.object_type {
                ObjectType::Blob => {
                    if !local.contains(&added.id) {
                        missing_blobs.push(added.id);
                    }
                }
                _ => trees.push(added.id),
            }
        }

        if !missing_blobs.is_empty() {
            for object in self.fetch_objects(&missing_blobs, None)? {
                local.add_raw(&object.into_raw())?;
            }
            let still_missing = missing_blobs.iter().filter(|id| !local.contains(id)).count();
            if still_missing > 0 {
                return Err(GitError::Protocol(format!(
                    "remote omitted {} requested blob(s)",
                    still_missing
                )));
            }
        }

        let mut copy = vec![tip, root];
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for depth in 1..segments.len() {
            if let Some(entry) = remote.read_by_path(&root, &segments[..depth].join("/"))? {
                copy.push(entry.oid);
            }
        }
        copy.extend(trees.iter().copied());
        for id in &copy {
            local.add_raw(&remote.read_raw(id)?)?;
        }
        repo.refs().set_ref(&tracking, tip)?;

        tracing::info!(
            remote = %self.url,
            branch,
            path,
            commit = %tip,
            blobs = missing_blobs.len(),
            trees = trees.len(),
            "Pulled"
        );
        Ok(PullOutcome {
            commit: tip,
            tree: remote_sub,
            fetched_blobs: missing_blobs.len(),
            copied_trees: trees.len(),
        })
    }

    /// Pushes the local `branch` when it is exactly one commit ahead of its
    /// tracking ref, overwriting the remote branch.
    pub fn force_push_one_commit(&mut self, repo: &Repository, branch: &str) -> Result<PushOutcome> {
        let result = self.push_commit(repo, branch);
        if result.is_err() {
            self.transition(ClientState::Idle);
        }
        result
    }

    fn push_commit(&mut self, repo: &Repository, branch: &str) -> Result<PushOutcome> {
        let local_ref = format!("{}{}", HEADS_PREFIX, branch);
        let tracking = self.tracking_ref(branch);
        let tip = repo.refs().get_ref(&local_ref)?;
        let commit = repo.objects().read_commit(&tip)?;
        let previous = repo.refs().try_get_ref(&tracking)?;
        if commit.parent() != previous {
            return Err(GitError::PushNotSingleCommit {
                branch: branch.to_string(),
                tracking,
            });
        }

        let mut builder = PackBuilder::new();
        for added in repo.objects().find_objects_added_in(tip, previous) {
            builder.add_from_store(repo.objects(), &added?.id)?;
        }
        let objects = builder.len();
        let pack = builder.build()?;

        let mut body = PktLine::from_string(&format!(
            "{} {} {}\0report-status force-update\n",
            previous.unwrap_or(ObjectId::NULL),
            tip,
            local_ref
        ))
        .encode();
        body.extend(PktLine::Flush.encode());
        body.extend_from_slice(&pack);

        self.transition(ClientState::Negotiating);
        self.run(ClientState::Pushed, |client| {
            let response = client.post("git-receive-pack", body, false)?;
            check_push_report(&response, &local_ref)?;
            repo.refs().set_ref(&tracking, tip)?;
            tracing::info!(remote = %client.url, branch, commit = %tip, objects, "Pushed");
            Ok(PushOutcome {
                commit: tip,
                previous,
                objects,
            })
        })
    }
}

/// Parses an `ls-refs` response into `name → oid`; unborn refs are skipped.
fn parse_ls_refs(body: &[u8]) -> Result<BTreeMap<String, ObjectId>> {
    let mut refs = BTreeMap::new();
    let mut cursor = 0;
    while let Some(pkt) = decode_next(body, &mut cursor)? {
        let line = match pkt {
            PktLine::Flush | PktLine::ResponseEnd => break,
            PktLine::Delimiter => continue,
            pkt => pkt
                .as_str()
                .ok_or_else(|| GitError::Protocol("ref line is not utf-8".to_string()))?
                .to_string(),
        };
        let mut fields = line.split(' ');
        let (oid, name) = match (fields.next(), fields.next()) {
            (Some("unborn"), Some(_)) => continue,
            (Some(oid), Some(name)) => (oid, name),
            _ => return Err(GitError::Protocol(format!("malformed ref line: {}", line))),
        };
        let id = ObjectId::from_hex(oid)
            .map_err(|_| GitError::Protocol(format!("malformed ref line: {}", line)))?;
        refs.insert(name.to_string(), id);
    }
    Ok(refs)
}

/// Parses a `fetch` response, skipping negotiation sections and collecting
/// the pack from the side-band `packfile` section.
pub fn parse_fetch_response<F>(body: &[u8], on_progress: F) -> Result<FetchResponse>
where
    F: FnMut(&str),
{
    let mut response = FetchResponse::default();
    let mut section: Option<String> = None;
    let mut cursor = 0;
    loop {
        let line = match decode_next(body, &mut cursor)? {
            None | Some(PktLine::Flush) | Some(PktLine::ResponseEnd) => {
                return Err(GitError::Protocol(
                    "fetch response has no packfile section".to_string(),
                ))
            }
            Some(PktLine::Delimiter) => {
                section = None;
                continue;
            }
            Some(pkt) => pkt
                .as_str()
                .ok_or_else(|| GitError::Protocol("response line is not utf-8".to_string()))?
                .to_string(),
        };

        if let Some(message) = line.strip_prefix("ERR ") {
            return Err(GitError::RemoteFatal(message.to_string()));
        }
        match section.as_deref() {
            None => match line.as_str() {
                "packfile" => {
                    response.pack = collect_pack_data(demultiplex_sideband(body, cursor), on_progress)?;
                    return Ok(response);
                }
                "acknowledgments" | "shallow-info" | "wanted-refs" | "packfile-uris" => {
                    section = Some(line);
                }
                other => {
                    return Err(GitError::Protocol(format!(
                        "unexpected response section: {}",
                        other
                    )))
                }
            },
            Some("acknowledgments") => {
                if let Some(id) = line.strip_prefix("ACK ") {
                    response.acknowledged.push(parse_id(id)?);
                } else if line == "ready" {
                    response.ready = true;
                }
            }
            Some("shallow-info") => {
                if let Some(id) = line.strip_prefix("shallow ") {
                    response.shallow.push(parse_id(id)?);
                }
            }
            Some(_) => {}
        }
    }
}

fn parse_id(text: &str) -> Result<ObjectId> {
    ObjectId::from_hex(text.trim())
        .map_err(|_| GitError::Protocol(format!("invalid object id: {}", text)))
}

/// Checks a `report-status` reply, which may be wrapped in side-band packets.
fn check_push_report(body: &[u8], refname: &str) -> Result<()> {
    let rejected = || GitError::PushRejected {
        response: String::from_utf8_lossy(body).into_owned(),
    };

    let sidebanded = decode_all(body)
        .ok()
        .and_then(|packets| {
            packets
                .iter()
                .find_map(|p| p.data().and_then(|d| d.first().copied()))
        })
        .and_then(Channel::from_byte)
        .is_some();
    let report = if sidebanded {
        collect_pack_data(demultiplex_sideband(body, 0), |message| {
            tracing::info!("remote: {}", message)
        })
        .map_err(|_| rejected())?
    } else {
        body.to_vec()
    };

    let lines: Vec<String> = decode_all(&report)
        .map_err(|_| rejected())?
        .iter()
        .filter_map(|pkt| pkt.data())
        .map(|data| {
            String::from_utf8_lossy(data)
                .trim_end_matches('\n')
                .to_string()
        })
        .collect();

    let expected = format!("ok {}", refname);
    if lines.first().map(String::as_str) == Some("unpack ok")
        && lines.get(1).map(String::as_str) == Some(expected.as_str())
    {
        Ok(())
    } else {
        Err(rejected())
    }
}
