//! Operator command loop on stdin.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use treeclone_core::summary::{read_manifest, write_manifest};
use treeclone_core::Selection;
use treeclone_services::ClientEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Request,
    Responders,
    Show { peer: String },
    Select { peer: String, selection: Selection },
    Load { peer: String, manifest: PathBuf },
    Summary,
    Cancel,
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.as_slice() {
            [] => return Ok(None),
            ["request"] => Self::Request,
            ["responders"] => Self::Responders,
            ["show", peer] => Self::Show {
                peer: peer.to_string(),
            },
            ["select", peer, src, dst] => Self::Select {
                peer: peer.to_string(),
                selection: Selection::new(*src, *dst),
            },
            ["load", peer, manifest] => Self::Load {
                peer: peer.to_string(),
                manifest: PathBuf::from(*manifest),
            },
            ["summary"] => Self::Summary,
            ["cancel"] => Self::Cancel,
            ["status"] => Self::Status,
            ["help"] | ["?"] => Self::Help,
            ["quit"] | ["exit"] => Self::Quit,
            other => bail!("unknown command: {}", other.join(" ")),
        };
        Ok(Some(command))
    }
}

/// Engine plus the selection being built for the next Summary.
pub struct Session {
    engine: Arc<ClientEngine>,
    manifest_dir: PathBuf,
    pending: BTreeMap<String, Vec<Selection>>,
}

impl Session {
    pub fn new(engine: Arc<ClientEngine>, manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            manifest_dir: manifest_dir.into(),
            pending: BTreeMap::new(),
        }
    }

    pub fn pending(&self) -> &BTreeMap<String, Vec<Selection>> {
        &self.pending
    }

    /// Run one command. Returns `false` when the loop should stop.
    pub async fn execute(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Request => {
                let epoch = self.engine.send_request().await?;
                println!("request sent (epoch {epoch})");
            }
            Command::Responders => {
                let responders = self.engine.responders().await;
                if responders.is_empty() {
                    println!("no responders yet");
                }
                for peer in responders {
                    println!("  {peer}  {}", self.engine.snapshot_path(&peer).display());
                }
            }
            Command::Show { peer } => match self.engine.snapshot(&peer)? {
                Some(snapshot) => println!("{snapshot}"),
                None => println!("no snapshot from {peer}"),
            },
            Command::Select { peer, selection } => {
                println!("selected {selection} from {peer}");
                self.pending.entry(peer).or_default().push(selection);
            }
            Command::Load { peer, manifest } => {
                let selections = read_manifest(&manifest)
                    .with_context(|| format!("failed to load manifest {}", manifest.display()))?;
                println!("loaded {} selections for {peer}", selections.len());
                self.pending.entry(peer).or_default().extend(selections);
            }
            Command::Summary => {
                if self.pending.is_empty() {
                    println!("nothing selected");
                    return Ok(true);
                }
                for (peer, list) in &self.pending {
                    let path = self.manifest_dir.join(format!("{peer}.txt"));
                    if let Err(e) = write_manifest(&path, list) {
                        tracing::warn!(peer = %peer, path = %path.display(), error = %e, "failed to save manifest");
                    }
                }
                let report = self.engine.send_summary(&self.pending).await;
                for peer in &report.sent {
                    println!("summary sent to {peer}");
                }
                for (peer, e) in &report.failed {
                    println!("summary to {peer} failed: {e}");
                }
                self.pending.clear();
            }
            Command::Cancel => {
                let epoch = self.engine.cancel_cloning().await;
                println!("cancelled; now at epoch {epoch}");
            }
            Command::Status => {
                println!("address   : {}", self.engine.address());
                println!("epoch     : {}", self.engine.epoch());
                println!("phase     : {}", self.engine.phase().await);
                println!("responders: {}", self.engine.responders().await.len());
                println!("pending   : {} peers", self.pending.len());
                for (sender, path) in self.engine.incoming().await {
                    println!("  receiving {} from {sender}", path.display());
                }
            }
            Command::Help => print_usage(),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }
}

fn print_usage() {
    println!("Commands:");
    println!("  request                      Broadcast a listing request");
    println!("  responders                   List peers that answered");
    println!("  show <peer>                  Print the listing <peer> sent");
    println!("  select <peer> <src> <dst>    Queue one file from <peer>");
    println!("  load <peer> <manifest>       Queue every line of a manifest");
    println!("  summary                      Send queued selections");
    println!("  cancel                       Start a new epoch");
    println!("  status                       Show epoch and phase");
    println!("  quit                         Disconnect and exit");
}

/// Read commands until EOF or `quit`. Command failures are reported and
/// the loop continues.
pub async fn run(engine: Arc<ClientEngine>, manifest_dir: PathBuf) -> Result<()> {
    let mut session = Session::new(engine, manifest_dir);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match session.execute(command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {e:#}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Mutex;
    use treeclone_core::Message;
    use treeclone_services::{SnapshotStore, Transport, TransportError};

    #[derive(Default)]
    struct Capture(Mutex<Vec<Message>>);

    impl Transport for Capture {
        fn send(&self, frame: Bytes) -> Result<(), TransportError> {
            self.0.lock().unwrap().push(Message::from_bytes(&frame).unwrap());
            Ok(())
        }
    }

    fn session(dir: &std::path::Path) -> (Session, Arc<Capture>) {
        let transport = Arc::new(Capture::default());
        let scanner = || Ok::<_, anyhow::Error>("{}".to_string());
        let engine = ClientEngine::new(
            "10.0.0.5",
            transport.clone(),
            Arc::new(scanner),
            SnapshotStore::new(dir.join("snapshots")).unwrap(),
        );
        (
            Session::new(Arc::new(engine), dir.join("manifests")),
            transport,
        )
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("  ").unwrap(), None);
        assert_eq!(Command::parse("request").unwrap(), Some(Command::Request));
        assert_eq!(
            Command::parse("select 10.0.0.9 /S/a /R/a").unwrap(),
            Some(Command::Select {
                peer: "10.0.0.9".into(),
                selection: Selection::new("/S/a", "/R/a"),
            })
        );
        assert_eq!(
            Command::parse("load 10.0.0.9 picks.txt").unwrap(),
            Some(Command::Load {
                peer: "10.0.0.9".into(),
                manifest: PathBuf::from("picks.txt"),
            })
        );
        assert_eq!(
            Command::parse("show 10.0.0.9").unwrap(),
            Some(Command::Show {
                peer: "10.0.0.9".into()
            })
        );
        assert!(Command::parse("select 10.0.0.9 /S/a").is_err());
        assert!(Command::parse("frobnicate").is_err());
    }

    #[tokio::test]
    async fn selections_accumulate_until_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, transport) = session(dir.path());

        let manifest = dir.path().join("picks.txt");
        std::fs::write(&manifest, "/S/b, /R/b\n/S/c, /R/c\n").unwrap();

        session
            .execute(Command::parse("select 10.0.0.9 /S/a /R/a").unwrap().unwrap())
            .await
            .unwrap();
        session
            .execute(Command::Load {
                peer: "10.0.0.9".into(),
                manifest,
            })
            .await
            .unwrap();
        assert_eq!(session.pending()["10.0.0.9"].len(), 3);

        assert!(session.execute(Command::Summary).await.unwrap());
        assert!(session.pending().is_empty());

        let sent = transport.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "/S/a, /R/a\n/S/b, /R/b\n/S/c, /R/c");

        let saved = read_manifest(&dir.path().join("manifests").join("10.0.0.9.txt")).unwrap();
        assert_eq!(
            saved,
            vec![
                Selection::new("/S/a", "/R/a"),
                Selection::new("/S/b", "/R/b"),
                Selection::new("/S/c", "/R/c"),
            ]
        );
    }

    #[tokio::test]
    async fn unwritable_manifest_dir_still_sends_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, transport) = session(dir.path());
        // A file where the manifest directory should be.
        std::fs::write(dir.path().join("manifests"), "").unwrap();

        session
            .execute(Command::parse("select 10.0.0.9 /S/a /R/a").unwrap().unwrap())
            .await
            .unwrap();
        assert!(session.execute(Command::Summary).await.unwrap());
        assert_eq!(transport.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn show_reads_stored_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session(dir.path());
        assert!(session
            .execute(Command::Show {
                peer: "10.0.0.9".into()
            })
            .await
            .unwrap());

        let response = Message::response("10.0.0.9", "10.0.0.5", 0, "{\"x\":{}}".into());
        session
            .engine
            .on_data_received(&response.to_bytes().unwrap())
            .await
            .unwrap();
        assert_eq!(
            session.engine.snapshot("10.0.0.9").unwrap().as_deref(),
            Some("{\"x\":{}}")
        );
        assert!(session
            .execute(Command::Show {
                peer: "10.0.0.9".into()
            })
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn bad_manifest_leaves_pending_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session(dir.path());
        let err = session
            .execute(Command::Load {
                peer: "10.0.0.9".into(),
                manifest: dir.path().join("missing.txt"),
            })
            .await;
        assert!(err.is_err());
        assert!(session.pending().is_empty());
    }

    #[tokio::test]
    async fn quit_stops_and_cancel_advances_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session(dir.path());
        assert!(session.execute(Command::Cancel).await.unwrap());
        assert_eq!(session.engine.epoch(), 1);
        assert!(!session.execute(Command::Quit).await.unwrap());
    }
}
