pub mod client;
pub mod extract;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use scraper::Html;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};

use crate::batch::CommandBatcher;
use crate::config::AppConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::gate::FetchGate;
use crate::model::{StateValue, ValueKind};
use crate::reconcile::{Reconciler, entity_path};
use crate::store::{ObjectMeta, ObjectStore, Translator, WriteEvent};

use self::client::IsgClient;
use self::extract::{ExtractContext, extract_commands, extract_status, extract_values};

/// Path of the synthetic reboot button entity.
const REBOOT_PATH: &str = "commands.reboot";

/// Grace period between a reboot request and the pipeline restart,
/// giving the gateway time to come back up.
const REBOOT_RESTART_DELAY: Duration = Duration::from_secs(30);

/// The scrape-and-reconcile engine: periodic page polls through the
/// fetch gate, extraction, reconciliation into the store, plus user
/// write handling via the command batcher.
pub struct IsgBridge {
    config: Arc<AppConfig>,
    client: Arc<IsgClient>,
    store: Arc<dyn ObjectStore>,
    translator: Arc<dyn Translator>,
    gate: FetchGate,
    reconciler: Reconciler,
    batcher: CommandBatcher<IsgClient>,
    readback: mpsc::Receiver<()>,
}

impl IsgBridge {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ObjectStore>,
        translator: Arc<dyn Translator>,
    ) -> BridgeResult<Self> {
        let client = Arc::new(IsgClient::new(&config.gateway, config.fetch_timeout())?);
        let gate = FetchGate::new(config.fetch.concurrency);
        let reconciler = Reconciler::new(
            store.clone(),
            config.value_interval(),
            config.command_interval(),
        );

        let (readback_tx, readback_rx) = mpsc::channel(4);
        let batcher = CommandBatcher::new(
            client.clone(),
            CommandBatcher::<IsgClient>::DEFAULT_DEBOUNCE,
            readback_tx,
        );

        Ok(Self {
            config: Arc::new(config),
            client,
            store,
            translator,
            gate,
            reconciler,
            batcher,
            readback: readback_rx,
        })
    }

    fn extract_context(&self) -> ExtractContext<'_> {
        ExtractContext {
            avoid_umlauts: self.config.avoid_umlauts,
            translator: &*self.translator,
        }
    }

    async fn ensure_reboot_object(&self) -> BridgeResult<()> {
        self.store
            .ensure_object(
                REBOOT_PATH,
                ObjectMeta {
                    name: "Reboot gateway".to_string(),
                    kind: ValueKind::Boolean,
                    read: false,
                    write: true,
                    unit: String::new(),
                    role: "button".to_string(),
                    min: None,
                    max: None,
                    states: None,
                    source_name: None,
                },
            )
            .await
    }

    /// One status-page pass: fetch, extract, reconcile, in document
    /// order. A fetch failure aborts only this page for this cycle.
    async fn poll_status_page(&self, path: &str) -> BridgeResult<()> {
        let body = self.gate.run(self.client.fetch_page(path)).await?;
        let readings = {
            let doc = Html::parse_document(&body);
            extract_status(&doc, &self.extract_context())
        };

        for reading in &readings {
            let path = entity_path(
                Reconciler::STATISTICS_BRANCH,
                &reading.group_path,
                &reading.key,
            );
            self.reconciler.apply_reading(&path, reading).await?;
        }
        Ok(())
    }

    async fn poll_values_page(&self, path: &str) -> BridgeResult<()> {
        let body = self.gate.run(self.client.fetch_page(path)).await?;
        let readings = {
            let doc = Html::parse_document(&body);
            extract_values(&doc, &self.extract_context())
        };

        for reading in &readings {
            let path = entity_path(
                Reconciler::STATISTICS_BRANCH,
                &reading.group_path,
                &reading.key,
            );
            self.reconciler.apply_reading(&path, reading).await?;
        }
        Ok(())
    }

    async fn poll_command_page(&self, path: &str) -> BridgeResult<()> {
        let body = self.gate.run(self.client.fetch_page(path)).await?;
        let page = {
            let doc = Html::parse_document(&body);
            extract_commands(&doc, &self.extract_context())
        };

        for command in &page.commands {
            let path = entity_path(
                Reconciler::SETTINGS_BRANCH,
                &command.group_path,
                &command.key,
            );
            self.reconciler.apply_command(&path, command).await?;
        }
        for reading in &page.readings {
            let path = entity_path(
                Reconciler::STATISTICS_BRANCH,
                &reading.group_path,
                &reading.key,
            );
            self.reconciler.apply_reading(&path, reading).await?;
        }
        Ok(())
    }

    /// Run one poll pass over a set of pages, interleaved through the
    /// fetch gate. Each page's outcome updates the connectivity flag;
    /// failures are per-page and never cancel sibling pages.
    async fn poll_pass<'a, F, Fut>(&'a self, pages: &'a [String], poll: F)
    where
        F: Fn(&'a Self, &'a str) -> Fut,
        Fut: Future<Output = BridgeResult<()>> + 'a,
    {
        let results = join_all(pages.iter().map(|page| {
            let fut = poll(self, page);
            async move { (page, fut.await) }
        }))
        .await;

        for (page, result) in results {
            match result {
                Ok(()) => self.store.set_connected(true).await,
                Err(err) => {
                    log::error!("Poll of page {page:?} failed: {err}");
                    self.store.set_connected(false).await;
                }
            }
        }
    }

    async fn poll_values_and_status(&self) {
        self.poll_pass(&self.config.pages.status.paths(), Self::poll_status_page)
            .await;
        self.poll_pass(&self.config.pages.values.paths(), Self::poll_values_page)
            .await;
    }

    async fn poll_commands(&self) {
        self.poll_pass(&self.config.command_pages(), Self::poll_command_page)
            .await;
    }

    /// Route one user write: the reboot button restarts the device and
    /// the polling pipeline; everything else is looked up and enqueued
    /// into the command batch under its device-side form field name.
    async fn handle_write(&self, event: WriteEvent) -> BridgeResult<()> {
        if event.path == REBOOT_PATH {
            log::warn!("Reboot requested, restarting gateway and polling pipeline");
            if let Err(err) = self.client.reboot().await {
                log::error!("Reboot request failed: {err}");
            }
            tokio::time::sleep(REBOOT_RESTART_DELAY).await;
            self.poll_values_and_status().await;
            self.poll_commands().await;
            return Ok(());
        }

        let Some(meta) = self.store.get_meta(&event.path).await? else {
            log::warn!("Write to unknown state {}, ignoring", event.path);
            return Ok(());
        };
        let Some(source_name) = meta.source_name else {
            log::warn!("Write to read-only state {}, ignoring", event.path);
            return Ok(());
        };

        let value = match event.value {
            StateValue::Bool(true) => "1".to_string(),
            StateValue::Bool(false) => "0".to_string(),
            other => other.to_string(),
        };
        self.batcher.enqueue(source_name, value).await;
        Ok(())
    }

    /// Main event loop: the two periodic poll drivers, user writes, and
    /// post-flush read-back passes. The drivers run on independent
    /// timers and may overlap; the reconciler's compare-and-patch logic
    /// is what keeps interleaved cycles safe.
    pub async fn run(mut self) -> BridgeResult<()> {
        self.ensure_reboot_object().await?;
        let mut writes = self.store.subscribe_writes();

        let mut value_tick = interval(self.config.value_interval());
        value_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut command_tick = interval(self.config.command_interval());
        command_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = value_tick.tick() => {
                    self.poll_values_and_status().await;
                }
                _ = command_tick.tick() => {
                    self.poll_commands().await;
                }
                event = writes.recv() => {
                    match event {
                        Ok(event) => {
                            if let Err(err) = self.handle_write(event).await {
                                log::error!("Failed to handle user write: {err}");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            log::warn!("Write subscription lagged, {missed} event(s) dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(BridgeError::ChannelClosed);
                        }
                    }
                }
                Some(()) = self.readback.recv() => {
                    log::debug!("Command flush confirmed, re-reading command pages");
                    self.poll_commands().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::config::{FetchConfig, GatewayConfig, PageList, PagesConfig, PollConfig};
    use crate::model::StateValue;
    use crate::store::{MemoryStore, NoTranslation};

    use super::*;

    fn config_for(addr: std::net::SocketAddr, values_page: &str) -> AppConfig {
        AppConfig {
            gateway: GatewayConfig {
                host: format!("http://{addr}"),
                user: "admin".to_string(),
                pass: "1234".to_string(),
            },
            poll: PollConfig {
                value_interval_secs: 180,
                command_interval_secs: 300,
            },
            fetch: FetchConfig {
                concurrency: 3,
                timeout_secs: 5,
            },
            avoid_umlauts: false,
            pages: PagesConfig {
                status: PageList::default(),
                values: PageList::Delimited(values_page.to_string()),
                commands: PageList::default(),
                expert_commands: PageList::default(),
            },
        }
    }

    fn bridge_for(addr: std::net::SocketAddr, store: &Arc<MemoryStore>) -> IsgBridge {
        let dyn_store: Arc<dyn ObjectStore> = store.clone();
        IsgBridge::new(config_for(addr, "2,0"), dyn_store, Arc::new(NoTranslation)).unwrap()
    }

    /// Serve exactly one canned HTTP response, then close.
    async fn one_shot(listener: TcpListener, status_line: &'static str, body: String) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0_u8; 4096];
        let _ = stream.read(&mut buf).await.unwrap();
        let response = format!(
            "{status_line}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn successful_poll_persists_readings_and_flips_connectivity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let html = extract::testutil::page(
            "ANLAGE",
            r#"<table class="info">
              <tr><th class="round-top" colspan="2">TEMPERATUREN</th></tr>
              <tr><td class="key">Außentemperatur</td><td class="value">5,3 °C</td></tr>
            </table>"#,
        );
        let server = tokio::spawn(one_shot(listener, "HTTP/1.1 200 OK", html));

        let store = Arc::new(MemoryStore::new());
        let bridge = bridge_for(addr, &store);
        bridge.poll_values_and_status().await;
        server.await.unwrap();

        assert!(store.connected());
        let stored = store
            .value("statistics.ANLAGE.TEMPERATUREN.AUSSENTEMPERATUR")
            .unwrap();
        assert_eq!(stored.value, StateValue::Number(5.3));
        assert!(stored.ack);
    }

    #[tokio::test]
    async fn rejected_poll_flips_connectivity_and_leaves_store_untouched() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(one_shot(
            listener,
            "HTTP/1.1 401 Unauthorized",
            String::new(),
        ));

        let store = Arc::new(MemoryStore::new());
        store.set_connected(true).await;
        let bridge = bridge_for(addr, &store);
        bridge.poll_values_and_status().await;
        server.await.unwrap();

        assert!(!store.connected());
        assert!(store
            .value("statistics.ANLAGE.TEMPERATUREN.AUSSENTEMPERATUR")
            .is_none());
    }

    #[tokio::test]
    async fn write_to_unknown_state_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let bridge = bridge_for("127.0.0.1:1".parse().unwrap(), &store);

        bridge
            .handle_write(WriteEvent {
                path: "settings.NOPE".to_string(),
                value: StateValue::Number(1.0),
            })
            .await
            .unwrap();
    }
}
