use std::net::SocketAddr;
use std::time::Duration;

use external_api::{ExternalApi, Health};
use key_pool::{KeyPool, PoolConfig, reclaimer::spawn_reclaimer};
use keyd_core::tokio::{self, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// A full keyd stack (pool + reclaimer + HTTP API) bound to a local port.
/// The cancellation token tears everything down when the env drops.
pub struct ServerEnv {
    pub base_url: String,
    token: CancellationToken,
    #[allow(unused)]
    api_task: JoinHandle<()>,
    #[allow(unused)]
    reclaimer_task: JoinHandle<()>,
}

impl ServerEnv {
    pub async fn start(port: u16, cfg: PoolConfig, sweep_interval: Duration) -> ServerEnv {
        let pool = KeyPool::with_config(cfg);
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let api = ExternalApi::new(addr, pool.clone());
        let sender = api.sender();

        let token = CancellationToken::new();
        let reclaimer_task = spawn_reclaimer(pool, sweep_interval, token.clone());
        let api_task = api.start(token.clone());

        // wait for the listener to come up before handing the env to the test
        tokio::time::sleep(Duration::from_millis(500)).await;
        sender
            .send(Health::Good)
            .await
            .expect("health listener running");

        ServerEnv {
            base_url: format!("http://{addr}"),
            token,
            api_task,
            reclaimer_task,
        }
    }
}

impl Drop for ServerEnv {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
