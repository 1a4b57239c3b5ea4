//! `wtlab connect`: open a session and watch every channel.
//!
//! Streams the session log to the terminal as it grows, optionally opens
//! local streams with periodic writers and sends datagrams, and prints a
//! counter summary when the session ends or Ctrl-C is pressed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use wtlab_client::{ClientConfig, WtClient};
use wtlab_core::channel::{spawn_periodic_writer, spawn_stream_reader};
use wtlab_core::{CancelSignal, ChannelKind, EventSink, LogEntry, Observer, Severity};

/// What to do once the session is ready.
#[derive(Debug, Clone, Default)]
pub struct Actions {
    pub bidi: usize,
    pub uni: usize,
    pub datagrams: Vec<Vec<u8>>,
    pub write_interval: Duration,
    /// Close after this long instead of waiting for Ctrl-C.
    pub duration: Option<Duration>,
}

fn render(entry: &LogEntry) -> String {
    let tag = match entry.severity {
        Severity::Info => "info",
        Severity::Success => " ok ",
        Severity::Warning => "warn",
        Severity::Error => "fail",
    };
    format!("[{tag}] {}", entry.message)
}

/// Print log entries as they appear. On `stop`, flushes what is left and
/// returns the number of entries printed.
fn spawn_log_printer(observer: Arc<Observer>, stop: CancelSignal) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut printed = 0usize;
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            printed = print_new(&observer, printed);
        }
        print_new(&observer, printed)
    })
}

fn print_new(observer: &Observer, printed: usize) -> usize {
    let entries = observer.entries();
    for entry in entries.iter().skip(printed) {
        println!("{}", render(entry));
    }
    entries.len().max(printed)
}

/// One line per channel type.
pub fn summary(observer: &Observer) -> String {
    ChannelKind::ALL
        .iter()
        .map(|k| format!("{:<15} {}", k.as_str(), observer.count(*k)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Connect, run `actions`, and wait for the session to end.
pub async fn run(config: ClientConfig, actions: Actions) -> Result<()> {
    let client = WtClient::new(config).context("failed to set up client")?;
    run_with(&client, actions).await
}

async fn run_with(client: &WtClient, actions: Actions) -> Result<()> {
    let endpoint = client.config().endpoint.clone();
    let observer = client.observer();
    let printing = CancelSignal::new();
    let printer = spawn_log_printer(observer.clone(), printing.clone());

    let lifecycle = match client.connect().await {
        Ok(lifecycle) => lifecycle,
        Err(e) => {
            printing.cancel();
            let _ = printer.await;
            return Err(e).with_context(|| format!("failed to connect to {endpoint}"));
        }
    };

    let outcome = match start_actions(client, &actions, lifecycle.cancel_signal()).await {
        Ok(()) => {
            let wait_limit = async {
                match actions.duration {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = lifecycle.terminated() => {}
                _ = wait_limit => {}
            }
            Ok(())
        }
        Err(e) => Err(e),
    };

    client.close(Some("client exit")).await;
    client.join().await;

    printing.cancel();
    let _ = printer.await;
    if outcome.is_ok() {
        println!("\n{}", summary(&observer));
    }
    outcome
}

/// Open the requested local streams and send the datagrams.
async fn start_actions(client: &WtClient, actions: &Actions, stop: CancelSignal) -> Result<()> {
    let sink: Arc<dyn EventSink> = client.observer();

    for _ in 0..actions.bidi {
        let bi = client
            .create_bidirectional()
            .await
            .context("failed to open bidirectional stream")?;
        spawn_periodic_writer(bi.send, actions.write_interval, sink.clone(), stop.clone());
        spawn_stream_reader(
            bi.recv,
            None,
            ChannelKind::Bidirectional,
            sink.clone(),
            stop.clone(),
        );
    }
    for _ in 0..actions.uni {
        let send = client
            .create_unidirectional()
            .await
            .context("failed to open unidirectional stream")?;
        spawn_periodic_writer(send, actions.write_interval, sink.clone(), stop.clone());
    }
    for payload in &actions.datagrams {
        // Failures are already in the log; keep going.
        let _ = client.send_datagram(payload).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wtlab_client::{Connector, HttpFingerprintSource, SessionState};
    use wtlab_core::mock::MockSession;
    use wtlab_core::transport::BoxFuture;
    use wtlab_core::{Session, WtResult};

    /// Connects to a mock peer that refuses every stream.
    struct RefusingStreams;

    impl Connector for RefusingStreams {
        fn connect<'a>(
            &'a self,
            _endpoint: &'a str,
            _pin: Option<&'a wtlab_core::CertificatePin>,
        ) -> BoxFuture<'a, WtResult<Arc<dyn Session>>> {
            Box::pin(async {
                let (client, _server) = MockSession::pair();
                client.reject_streams(true);
                Ok(client as Arc<dyn Session>)
            })
        }
    }

    #[test]
    fn render_tags_severity() {
        assert_eq!(render(&LogEntry::info("hello")), "[info] hello");
        assert_eq!(render(&LogEntry::success("ready")), "[ ok ] ready");
        assert_eq!(render(&LogEntry::error("boom")), "[fail] boom");
    }

    #[test]
    fn summary_lists_every_channel() {
        let observer = Observer::new();
        observer.on_count(ChannelKind::Datagram);
        observer.on_count(ChannelKind::Datagram);
        observer.on_count(ChannelKind::Unidirectional);
        let text = summary(&observer);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("datagram") && lines[0].ends_with(" 2"));
        assert!(lines[1].ends_with(" 0"));
        assert!(lines[2].starts_with("unidirectional") && lines[2].ends_with(" 1"));
    }

    #[test]
    fn print_new_tracks_position() {
        let observer = Observer::new();
        observer.on_log(LogEntry::info("a"));
        let printed = print_new(&observer, 0);
        assert_eq!(printed, 1);
        observer.on_log(LogEntry::info("b"));
        assert_eq!(print_new(&observer, printed), 2);
    }

    #[tokio::test]
    async fn printer_flushes_on_stop() {
        let observer = Arc::new(Observer::new());
        let stop = CancelSignal::new();
        let printer = spawn_log_printer(observer.clone(), stop.clone());
        observer.on_log(LogEntry::info("one"));
        observer.on_log(LogEntry::success("two"));
        stop.cancel();
        let printed = tokio::time::timeout(Duration::from_secs(2), printer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(printed, 2);
    }

    #[tokio::test]
    async fn stream_failure_still_closes_the_session() {
        let config = ClientConfig {
            pinning: false,
            ..ClientConfig::default()
        };
        let client = WtClient::with_parts(
            config,
            Arc::new(HttpFingerprintSource::new(Duration::from_secs(1)).unwrap()),
            Arc::new(RefusingStreams),
        );
        let actions = Actions {
            bidi: 1,
            write_interval: Duration::from_millis(10),
            ..Actions::default()
        };

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            run_with(&client, actions),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(format!("{err:#}").contains("failed to open bidirectional stream"));
        assert_eq!(client.state().await, Some(SessionState::Closed));
    }
}
