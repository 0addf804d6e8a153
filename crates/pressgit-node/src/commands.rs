//! Subcommand implementations.

use anyhow::{anyhow, Context};
use pressgit_git::{ClientOptions, GitClient, GitServer, LoopbackTransport};
use pressgit_node::api::{create_router, AppState};
use pressgit_node::config::NodeConfig;
use pressgit_node::transport::ReqwestTransport;
use pressgit_storage::{CommitRequest, LocalStorage, Repository};
use std::sync::Arc;

fn open_repository(config: &NodeConfig) -> anyhow::Result<Repository> {
    let storage = LocalStorage::new(&config.data_dir)
        .with_context(|| format!("opening {}", config.data_dir.display()))?;
    Ok(Repository::open(Arc::new(storage))?)
}

/// Creates the repository layout and records identity and remote.
pub fn init(config: &NodeConfig, remote: Option<&str>) -> anyhow::Result<()> {
    let repo = open_repository(config)?;
    let mut repo_config = repo.config()?;
    if let Some(name) = &config.user_name {
        repo_config.set("user.name", name)?;
    }
    if let Some(email) = &config.user_email {
        repo_config.set("user.email", email)?;
    }
    if let Some(url) = remote {
        repo_config.add_remote("origin", url)?;
    }
    repo.save_config(&repo_config)?;

    println!(
        "Initialized pressgit repository in {}",
        config.data_dir.display()
    );
    Ok(())
}

/// Serves the repository until Ctrl+C.
pub fn serve(config: &NodeConfig) -> anyhow::Result<()> {
    let repo = open_repository(config)?;
    let server = GitServer::new(repo);
    self_check(&server)?;

    let router = create_router(AppState::new(server));
    let addr = config.listen_addr;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {}", addr))?;
        tracing::info!(addr = %addr, "Serving repository");
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down");
            })
            .await?;
        Ok::<_, anyhow::Error>(())
    })
}

/// Lists refs through an in-process client before accepting connections.
fn self_check(server: &GitServer) -> anyhow::Result<()> {
    let mut client = GitClient::new("http://loopback", LoopbackTransport::new(server.clone()));
    let refs = client
        .fetch_refs("refs/heads/", None)
        .context("self-check failed")?;
    tracing::info!(branches = refs.len(), "Self-check passed");
    Ok(())
}

/// Records `files` (`repo/path=local/file`) as one commit.
pub fn commit(config: &NodeConfig, message: Option<&str>, files: &[String]) -> anyhow::Result<()> {
    let repo = open_repository(config)?;
    let mut request = CommitRequest::new();
    for spec in files {
        let (path, local) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("expected repo/path=local/file, got {}", spec))?;
        let content =
            std::fs::read(local).with_context(|| format!("reading {}", local))?;
        request = request.update(path, content);
    }
    if let Some(message) = message {
        request = request.message(message);
    }

    let outcome = repo.commit(request)?;
    if outcome.created {
        println!("{} (tree {})", outcome.commit, outcome.tree);
    } else {
        println!("nothing to commit, tip is {}", outcome.commit);
    }
    Ok(())
}

fn client(
    config: &NodeConfig,
    repo: &Repository,
    remote: &str,
    url: Option<&str>,
) -> anyhow::Result<GitClient<ReqwestTransport>> {
    let url = match url {
        Some(url) => url.to_string(),
        None => repo
            .config()?
            .remote_url(remote)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("remote {} has no url, pass --url", remote))?,
    };
    let transport = ReqwestTransport::new(config.request_timeout())?;
    let options = ClientOptions {
        remote_name: remote.to_string(),
        ..ClientOptions::default()
    };
    let mut client = GitClient::with_options(url, transport, options);
    client.on_progress(|line| tracing::info!(progress = %line.trim_end(), "remote"));
    Ok(client)
}

/// Lists remote branches and records them as tracking refs.
pub fn fetch(config: &NodeConfig, remote: &str, url: Option<&str>) -> anyhow::Result<()> {
    let repo = open_repository(config)?;
    let mut client = client(config, &repo, remote, url)?;
    let refs = client.fetch_refs("refs/heads/", Some(&repo))?;
    for (name, id) in &refs {
        println!("{} {}", id, name);
    }
    Ok(())
}

/// Makes `path` match the remote branch.
pub fn pull(
    config: &NodeConfig,
    remote: &str,
    url: Option<&str>,
    branch: &str,
    path: &str,
) -> anyhow::Result<()> {
    let repo = open_repository(config)?;
    let mut client = client(config, &repo, remote, url)?;
    let outcome = client.force_pull(&repo, branch, path)?;
    println!(
        "{} at {}: {} blob(s) fetched, {} tree(s) copied",
        outcome.tree, outcome.commit, outcome.fetched_blobs, outcome.copied_trees
    );
    Ok(())
}

/// Pushes `branch`, overwriting the remote branch.
pub fn push(
    config: &NodeConfig,
    remote: &str,
    url: Option<&str>,
    branch: &str,
) -> anyhow::Result<()> {
    let repo = open_repository(config)?;
    let mut client = client(config, &repo, remote, url)?;
    let outcome = client.force_push_one_commit(&repo, branch)?;
    match outcome.previous {
        Some(previous) => println!("{}..{} {}", previous, outcome.commit, branch),
        None => println!("* {} {}", outcome.commit, branch),
    }
    Ok(())
}
