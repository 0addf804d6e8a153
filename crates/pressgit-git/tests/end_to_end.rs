//! End-to-end tests: a client talking to a server through an in-process transport.

use bytes::Bytes;
use pressgit_git::{
    decode_next, ClientState, FetchRequest, GitClient, GitError, GitServer, HttpRequest,
    HttpTransport, LoopbackTransport, PackParser, PktLine, PktLineWriter, TransportEvent,
};
use pressgit_storage::{
    CommitRequest, GitObject, ObjectId, ObjectType, Repository, Signature, StorageError,
};
use std::collections::HashSet;

const URL: &str = "http://localhost:8080/site.git";

fn signature() -> Signature {
    Signature::new("Tester <tester@example.com>", "1700000000 +0000")
}

fn commit(repo: &Repository, updates: &[(&str, &str)]) -> ObjectId {
    let mut request = CommitRequest::new()
        .author(signature())
        .committer(signature())
        .message("update");
    for (path, content) in updates {
        request = request.update(*path, content.to_string());
    }
    repo.commit(request).unwrap().commit
}

fn client_for(repo: &Repository) -> GitClient<LoopbackTransport> {
    GitClient::new(URL, LoopbackTransport::new(GitServer::new(repo.clone())))
}

#[test]
fn test_fetch_hello_world() {
    let server_repo = Repository::in_memory().unwrap();
    let tip = commit(&server_repo, &[("README.md", "Hello, world!")]);

    let mut client = client_for(&server_repo);
    let refs = client.fetch_refs("HEAD", None).unwrap();
    assert_eq!(refs.get("HEAD"), Some(&tip));
    assert_eq!(client.state(), ClientState::RefsListed);

    let response = client
        .fetch(&FetchRequest {
            wants: vec![tip],
            ..FetchRequest::default()
        })
        .unwrap();
    assert_eq!(client.state(), ClientState::PackReceived);

    let objects = PackParser::new(&response.pack).decode().unwrap();
    assert_eq!(objects.len(), 3);
    let commit = objects.iter().find(|o| o.id == tip).unwrap();
    let tree_id = match GitObject::decode(ObjectType::Commit, &commit.data).unwrap() {
        GitObject::Commit(commit) => commit.tree,
        other => panic!("expected a commit, got {:?}", other),
    };
    let tree_object = objects.iter().find(|o| o.id == tree_id).unwrap();
    let tree = match GitObject::decode(ObjectType::Tree, &tree_object.data).unwrap() {
        GitObject::Tree(tree) => tree,
        other => panic!("expected a tree, got {:?}", other),
    };
    assert_eq!(tree.len(), 1);
    let entry = tree.get("README.md").unwrap();
    let blob = objects.iter().find(|o| o.id == entry.oid).unwrap();
    assert_eq!(blob.object_type, ObjectType::Blob);
    assert_eq!(blob.data.as_ref(), b"Hello, world!");
}

#[test]
fn test_fetch_filters() {
    let server_repo = Repository::in_memory().unwrap();
    let big = "x".repeat(2000);
    let tip = commit(&server_repo, &[("small.txt", "tiny file"), ("big.bin", &big)]);
    let tree = server_repo.objects().read_commit(&tip).unwrap().tree;
    let small = ObjectId::hash_object(ObjectType::Blob, b"tiny file");

    let mut client = client_for(&server_repo);
    let fetch_ids = |client: &mut GitClient<LoopbackTransport>, filter: &str| {
        let response = client
            .fetch(&FetchRequest {
                wants: vec![tip],
                filter: Some(filter.to_string()),
                ..FetchRequest::default()
            })
            .unwrap();
        PackParser::new(&response.pack)
            .decode()
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect::<HashSet<_>>()
    };

    assert_eq!(
        fetch_ids(&mut client, "blob:none"),
        HashSet::from([tip, tree])
    );
    assert_eq!(
        fetch_ids(&mut client, "blob:limit=1000"),
        HashSet::from([tip, tree, small])
    );
    assert_eq!(fetch_ids(&mut client, "blob:limit=2k").len(), 4);

    let err = client
        .fetch(&FetchRequest {
            wants: vec![tip],
            filter: Some("tree:0".to_string()),
            ..FetchRequest::default()
        })
        .unwrap_err();
    assert!(matches!(err, GitError::Transport(msg) if msg.contains("400")));
    assert_eq!(client.state(), ClientState::Idle);
}

#[test]
fn test_fetch_incremental_with_haves() {
    let server_repo = Repository::in_memory().unwrap();
    let first = commit(&server_repo, &[("a.txt", "a"), ("dir/b.txt", "b")]);
    let second = commit(&server_repo, &[("dir/b.txt", "b2")]);

    let mut client = client_for(&server_repo);
    let response = client
        .fetch(&FetchRequest {
            wants: vec![second],
            haves: vec![first],
            ..FetchRequest::default()
        })
        .unwrap();
    assert_eq!(response.acknowledged, vec![first]);
    assert!(response.ready);

    let objects = PackParser::new(&response.pack).decode().unwrap();
    // commit, root tree, dir tree, new blob
    assert_eq!(objects.len(), 4);
    assert!(objects.iter().all(|o| o.id != first));
}

#[test]
fn test_list_objects_and_fetch_objects() {
    let server_repo = Repository::in_memory().unwrap();
    commit(&server_repo, &[("a.txt", "one")]);
    let tip = commit(&server_repo, &[("docs/guide.md", "guide")]);

    let mut client = client_for(&server_repo);
    let store = client.list_objects(tip).unwrap();
    let root = store.read_commit(&tip).unwrap().tree;
    let guide = store.read_by_path(&root, "docs/guide.md").unwrap().unwrap();
    assert!(!store.contains(&guide.oid));

    let objects = client.fetch_objects(&[guide.oid], None).unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].data.as_ref(), b"guide");
}

#[test]
fn test_force_pull_with_path() {
    let server_repo = Repository::in_memory().unwrap();
    commit(
        &server_repo,
        &[
            ("site/index.html", "<h1>hi</h1>"),
            ("site/css/main.css", "body {}"),
            ("other/big.bin", "not wanted"),
        ],
    );

    let local = Repository::in_memory().unwrap();
    let mut client = client_for(&server_repo);
    let outcome = client.force_pull(&local, "main", "site").unwrap();
    assert_eq!(outcome.fetched_blobs, 2);
    assert_eq!(outcome.copied_trees, 2);

    let tracking = local.refs().get_ref("refs/remotes/origin/main").unwrap();
    assert_eq!(tracking, outcome.commit);
    let root = local.objects().read_commit(&tracking).unwrap().tree;
    let css = local
        .objects()
        .read_by_path(&root, "site/css/main.css")
        .unwrap()
        .unwrap();
    assert_eq!(local.objects().read_raw(&css.oid).unwrap().data.as_ref(), b"body {}");
    let other = ObjectId::hash_object(ObjectType::Blob, b"not wanted");
    assert!(!local.objects().contains(&other));
    assert!(local.head().unwrap().is_none());

    commit(&server_repo, &[("site/index.html", "<h1>hello</h1>")]);
    let second = client.force_pull(&local, "main", "site").unwrap();
    assert_eq!(second.fetched_blobs, 1);
    assert_eq!(second.copied_trees, 1);
    assert_ne!(second.commit, outcome.commit);

    let err = client.force_pull(&local, "main", "missing").unwrap_err();
    assert!(matches!(err, GitError::Storage(StorageError::PathNotFound(_))));
    let err = client.force_pull(&local, "nope", "site").unwrap_err();
    assert!(matches!(err, GitError::Storage(StorageError::RefNotFound(_))));
}

fn read_local(repo: &Repository, path: &str) -> Vec<u8> {
    let objects = repo.objects();
    let tracking = repo.refs().get_ref("refs/remotes/origin/main").unwrap();
    let root = objects.read_commit(&tracking).unwrap().tree;
    let entry = objects.read_by_path(&root, path).unwrap().unwrap();
    objects.read_raw(&entry.oid).unwrap().data.to_vec()
}

#[test]
fn test_force_pull_second_path_unchanged_on_remote() {
    let server_repo = Repository::in_memory().unwrap();
    commit(&server_repo, &[("site/a.txt", "a1"), ("other/b.txt", "b1")]);

    let local = Repository::in_memory().unwrap();
    let mut client = client_for(&server_repo);
    client.force_pull(&local, "main", "site").unwrap();

    let outcome = client.force_pull(&local, "main", "other").unwrap();
    assert_eq!(outcome.fetched_blobs, 1);
    assert_eq!(outcome.copied_trees, 1);
    assert_eq!(read_local(&local, "other/b.txt"), b"b1");
    assert_eq!(read_local(&local, "site/a.txt"), b"a1");
}

#[test]
fn test_force_pull_second_path_changed_on_remote() {
    let server_repo = Repository::in_memory().unwrap();
    commit(&server_repo, &[("site/a.txt", "a1"), ("other/b.txt", "b1")]);

    let local = Repository::in_memory().unwrap();
    let mut client = client_for(&server_repo);
    let first = client.force_pull(&local, "main", "site").unwrap();

    commit(&server_repo, &[("other/b.txt", "b2")]);
    let outcome = client.force_pull(&local, "main", "other").unwrap();
    assert_ne!(outcome.commit, first.commit);
    assert_eq!(outcome.fetched_blobs, 1);
    assert_eq!(read_local(&local, "other/b.txt"), b"b2");
    let stale = ObjectId::hash_object(ObjectType::Blob, b"b1");
    assert!(!local.objects().contains(&stale));
}

#[test]
fn test_force_pull_widens_to_whole_tree() {
    let server_repo = Repository::in_memory().unwrap();
    commit(
        &server_repo,
        &[("site/a.txt", "a1"), ("other/deep/b.txt", "b1"), ("top.txt", "t")],
    );

    let local = Repository::in_memory().unwrap();
    let mut client = client_for(&server_repo);
    client.force_pull(&local, "main", "site").unwrap();

    let outcome = client.force_pull(&local, "main", "").unwrap();
    assert_eq!(outcome.fetched_blobs, 2);
    assert_eq!(outcome.copied_trees, 2);
    assert_eq!(read_local(&local, "other/deep/b.txt"), b"b1");
    assert_eq!(read_local(&local, "top.txt"), b"t");

    // Everything is local now, so a repeat pull transfers nothing.
    let again = client.force_pull(&local, "main", "").unwrap();
    assert_eq!(again.fetched_blobs, 0);
    assert_eq!(again.copied_trees, 0);
}

/// Loopback transport that also accepts pushes, which the read-only server refuses.
struct ReceivingTransport {
    loopback: LoopbackTransport,
    reject: bool,
}

impl ReceivingTransport {
    fn new(repo: &Repository, reject: bool) -> Self {
        Self {
            loopback: LoopbackTransport::new(GitServer::new(repo.clone())),
            reject,
        }
    }
}

impl HttpTransport for ReceivingTransport {
    type Events = std::vec::IntoIter<TransportEvent>;

    fn execute(&self, request: HttpRequest) -> Self::Events {
        if !request.url.ends_with("/git-receive-pack") {
            return self.loopback.execute(request);
        }

        let mut cursor = 0;
        let command = decode_next(&request.body, &mut cursor).unwrap().unwrap();
        assert_eq!(
            decode_next(&request.body, &mut cursor).unwrap(),
            Some(PktLine::Flush)
        );
        let command = command.data().unwrap();
        let nul = command.iter().position(|&b| b == 0).unwrap();
        let capabilities = std::str::from_utf8(&command[nul + 1..]).unwrap();
        assert_eq!(capabilities, "report-status force-update\n");
        let update = std::str::from_utf8(&command[..nul]).unwrap();
        let fields: Vec<&str> = update.split(' ').collect();
        let new = ObjectId::from_hex(fields[1]).unwrap();
        let refname = fields[2];

        let repo = self.loopback.server().repository();
        PackParser::new(&request.body[cursor..])
            .with_base_store(repo.objects())
            .decode_into(repo.objects())
            .unwrap();

        let mut writer = PktLineWriter::new(Vec::new());
        writer.write_line("unpack ok").unwrap();
        if self.reject {
            writer
                .write_line(&format!("ng {} stale info", refname))
                .unwrap();
        } else {
            repo.refs().set_ref(refname, new).unwrap();
            writer.write_line(&format!("ok {}", refname)).unwrap();
        }
        writer.flush_pkt().unwrap();

        vec![
            TransportEvent::Headers {
                status: 200,
                headers: Vec::new(),
            },
            TransportEvent::BodyChunk(Bytes::from(writer.into_inner())),
        ]
        .into_iter()
    }
}

fn pulled_clone(server_repo: &Repository, reject: bool) -> (Repository, GitClient<ReceivingTransport>) {
    let local = Repository::in_memory().unwrap();
    let mut client = GitClient::new(URL, ReceivingTransport::new(server_repo, reject));
    let pulled = client.force_pull(&local, "main", "").unwrap();
    local.refs().set_ref("refs/heads/main", pulled.commit).unwrap();
    (local, client)
}

#[test]
fn test_force_push_one_commit() {
    let server_repo = Repository::in_memory().unwrap();
    let base = commit(&server_repo, &[("index.md", "home"), ("docs/a.md", "a")]);

    let (local, mut client) = pulled_clone(&server_repo, false);
    let tip = commit(&local, &[("docs/b.md", "b")]);

    let outcome = client.force_push_one_commit(&local, "main").unwrap();
    assert_eq!(outcome.commit, tip);
    assert_eq!(outcome.previous, Some(base));
    // commit, root tree, docs tree, new blob
    assert_eq!(outcome.objects, 4);
    assert_eq!(client.state(), ClientState::Pushed);

    assert_eq!(server_repo.refs().get_ref("refs/heads/main").unwrap(), tip);
    let root = server_repo.objects().read_commit(&tip).unwrap().tree;
    assert!(server_repo
        .objects()
        .read_by_path(&root, "docs/b.md")
        .unwrap()
        .is_some());
    assert_eq!(
        local.refs().get_ref("refs/remotes/origin/main").unwrap(),
        tip
    );
}

#[test]
fn test_push_requires_single_commit() {
    let server_repo = Repository::in_memory().unwrap();
    commit(&server_repo, &[("index.md", "home")]);

    let (local, mut client) = pulled_clone(&server_repo, false);
    commit(&local, &[("one.md", "1")]);
    commit(&local, &[("two.md", "2")]);

    let err = client.force_push_one_commit(&local, "main").unwrap_err();
    assert!(matches!(err, GitError::PushNotSingleCommit { .. }));
}

#[test]
fn test_push_rejected() {
    let server_repo = Repository::in_memory().unwrap();
    let base = commit(&server_repo, &[("index.md", "home")]);

    let (local, mut client) = pulled_clone(&server_repo, true);
    commit(&local, &[("index.md", "changed")]);

    match client.force_push_one_commit(&local, "main") {
        Err(GitError::PushRejected { response }) => assert!(response.contains("stale info")),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(client.state(), ClientState::Idle);
    assert_eq!(server_repo.refs().get_ref("refs/heads/main").unwrap(), base);
    assert_eq!(
        local.refs().get_ref("refs/remotes/origin/main").unwrap(),
        base
    );
}

#[test]
fn test_fetch_refs_updates_tracking_refs() {
    let server_repo = Repository::in_memory().unwrap();
    let tip = commit(&server_repo, &[("a.txt", "a")]);
    server_repo.refs().set_ref("refs/heads/draft", tip).unwrap();

    let local = Repository::in_memory().unwrap();
    let mut client = client_for(&server_repo);
    let refs = client.fetch_refs("refs/heads/", Some(&local)).unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!(local.refs().get_ref("refs/remotes/origin/draft").unwrap(), tip);
    assert_eq!(local.refs().get_ref("refs/remotes/origin/main").unwrap(), tip);
}
