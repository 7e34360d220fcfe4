//! Bulk upload ("zap") of a local staging tree.
//!
//! A staging tree mirrors remote repository layout on disk; the zap step
//! uploads the entire tree in one pass, preserving relative paths, through
//! the same credentials (and proxy, if any) as the staging client. Any I/O
//! or transport failure aborts the whole upload and is reported as a single
//! deployment failure.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use walkdir::WalkDir;

use crate::settings::ConnectionDescriptor;
use crate::store::IDENTITY_FILE;

/// Upload every file under `local_dir` to `remote_base` (normalized to end
/// with `/`), keeping relative paths. The identity record at the tree root
/// is bookkeeping, not an artifact, and is skipped.
pub fn deploy_up(local_dir: &Path, remote_base: &str, conn: &ConnectionDescriptor) -> Result<()> {
    let base = if remote_base.ends_with('/') {
        remote_base.to_string()
    } else {
        format!("{remote_base}/")
    };

    let http = build_client(conn)?;

    let result = (|| -> Result<()> {
        for entry in WalkDir::new(local_dir) {
            let entry = entry.context("failed to walk staging tree")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(local_dir)
                .context("staged file outside the staging tree")?;
            if rel == Path::new(IDENTITY_FILE) {
                continue;
            }
            upload_file(&http, conn, &base, entry.path(), rel)?;
        }
        Ok(())
    })();

    result.with_context(|| {
        format!(
            "staging deploy of {} to {base} failed",
            local_dir.display()
        )
    })
}

fn build_client(conn: &ConnectionDescriptor) -> Result<Client> {
    let mut builder = Client::builder().user_agent(format!("stagehand/{}", env!("CARGO_PKG_VERSION")));
    if let Some(proxy) = &conn.proxy {
        let mut p = reqwest::Proxy::all(&proxy.url)
            .with_context(|| format!("invalid proxy URL {}", proxy.url))?;
        if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
            p = p.basic_auth(user, pass);
        }
        builder = builder.proxy(p);
    }
    builder.build().context("failed to build upload HTTP client")
}

fn upload_file(
    http: &Client,
    conn: &ConnectionDescriptor,
    base: &str,
    path: &Path,
    rel: &Path,
) -> Result<()> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read staged file {}", path.display()))?;

    // Relative paths come out of walkdir with the platform separator.
    let rel_url = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let url = format!("{base}{rel_url}");

    let resp = http
        .put(&url)
        .basic_auth(&conn.username, Some(&conn.password))
        .body(bytes)
        .send()
        .with_context(|| format!("upload failed: PUT {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        bail!("upload of {rel_url} rejected with {status}: {}", body.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::mpsc;
    use std::thread;

    use tempfile::tempdir;
    use tiny_http::{Response, Server};

    use super::*;

    fn conn(base: &str) -> ConnectionDescriptor {
        ConnectionDescriptor {
            base_url: base.to_string(),
            username: "deployer".to_string(),
            password: "secret".to_string(),
            proxy: None,
        }
    }

    fn collecting_server(
        count: usize,
        status: u16,
    ) -> (String, mpsc::Receiver<(String, Vec<u8>)>) {
        let server = Server::http("127.0.0.1:0").expect("bind");
        let base = format!("http://{}", server.server_addr());
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for _ in 0..count {
                let Ok(mut request) = server.recv() else {
                    return;
                };
                let mut body = Vec::new();
                let _ = request.as_reader().read_to_end(&mut body);
                let _ = tx.send((request.url().to_string(), body));
                let _ = request.respond(Response::empty(status));
            }
        });
        (base, rx)
    }

    #[test]
    fn uploads_the_whole_tree_preserving_relative_paths() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("org").join("example").join("demo").join("1.0");
        fs::create_dir_all(&nested).expect("mkdirs");
        fs::write(nested.join("demo-1.0.jar"), b"jarbytes").expect("write");
        fs::write(nested.join("demo-1.0.pom"), b"pombytes").expect("write");
        // Bookkeeping at the tree root must not be uploaded.
        fs::write(td.path().join(IDENTITY_FILE), b"stagingRepository.id=x").expect("write");

        let (base, rx) = collecting_server(2, 201);
        // Base URL without the trailing slash: deploy_up must normalize it.
        deploy_up(td.path(), &format!("{base}/repo/orgfoo-1042"), &conn(&base)).expect("deploy");

        let mut urls: Vec<String> = (0..2).map(|_| rx.recv().expect("request").0).collect();
        urls.sort();
        assert_eq!(
            urls,
            vec![
                "/repo/orgfoo-1042/org/example/demo/1.0/demo-1.0.jar",
                "/repo/orgfoo-1042/org/example/demo/1.0/demo-1.0.pom",
            ]
        );
    }

    #[test]
    fn a_rejected_file_fails_the_whole_deploy() {
        let td = tempdir().expect("tempdir");
        fs::write(td.path().join("artifact.jar"), b"jarbytes").expect("write");

        let (base, _rx) = collecting_server(1, 401);
        let err = deploy_up(td.path(), &format!("{base}/repo/x/"), &conn(&base)).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("staging deploy"), "{msg}");
        assert!(msg.contains("401"), "{msg}");
    }

    #[test]
    fn empty_tree_uploads_nothing_and_succeeds() {
        let td = tempdir().expect("tempdir");
        let (base, _rx) = collecting_server(0, 201);
        deploy_up(td.path(), &format!("{base}/repo/x/"), &conn(&base)).expect("deploy");
    }
}
