//! key server configs

pub mod cli {
    //! Parse from either cli or env var

    /// Default address for the key API
    pub static DEFAULT_API_ADDR: &str = "[::]:8000";
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "keyd-worker";
    /// default log level. Can use this argument or KEYD_LOG env var
    pub const DEFAULT_KEYD_LOG: &str = "info";
    /// seconds a key may stay checked out before the reclaimer returns it
    pub const DEFAULT_BLOCK_TIMEOUT: u64 = 20;
    /// seconds since last access before the reclaimer destroys a key
    pub const DEFAULT_IDLE_TIMEOUT: u64 = 60;
    /// seconds between reclaimer sweeps
    pub const DEFAULT_SWEEP_INTERVAL: u64 = 1;

    use std::{net::SocketAddr, time::Duration};

    pub use clap::Parser;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "keyd", bin_name = "keyd", about, long_about = None)]
    /// parses from cli & environment var. keyd will load `.env` in the same dir as the binary as well
    pub struct Config {
        /// the address the key API listens on
        #[clap(long, env, value_parser, default_value = DEFAULT_API_ADDR)]
        pub api_addr: SocketAddr,
        /// seconds a checked-out key may stay blocked before automatic release
        #[clap(long, env, value_parser, default_value_t = DEFAULT_BLOCK_TIMEOUT)]
        pub block_timeout: u64,
        /// seconds since last access before a key is destroyed
        #[clap(long, env, value_parser, default_value_t = DEFAULT_IDLE_TIMEOUT)]
        pub idle_timeout: u64,
        /// seconds between reclaimer sweeps
        #[clap(long, env, value_parser, default_value_t = DEFAULT_SWEEP_INTERVAL)]
        pub sweep_interval: u64,
        /// number of tokio worker threads. Defaults to num logical CPUs
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_KEYD_LOG)]
        pub keyd_log: String,
    }

    impl Config {
        /// Block timeout as a `Duration`
        pub fn block_timeout(&self) -> Duration {
            Duration::from_secs(self.block_timeout)
        }

        /// Idle timeout as a `Duration`
        pub fn idle_timeout(&self) -> Duration {
            Duration::from_secs(self.idle_timeout)
        }

        /// Sweep interval as a `Duration`
        pub fn sweep_interval(&self) -> Duration {
            Duration::from_secs(self.sweep_interval)
        }
    }

}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    use std::env;

    /// log as "json" or "standard" (unstructured)
    static DEFAULT_LOG_FORMAT: &str = "standard";

    /// Configuration for the tracing subscriber
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// Install the global subscriber. The filter level comes from
        /// `keyd_log`, the output format from the LOG_FORMAT env var
        pub fn parse(keyd_log: &str) -> Result<Self> {
            let log_frmt =
                env::var("LOG_FORMAT").unwrap_or_else(|_| DEFAULT_LOG_FORMAT.to_owned());

            // Log level comes from KEYD_LOG
            let filter = EnvFilter::try_new(keyd_log)
                .or_else(|_| EnvFilter::try_new("info"))?
                .add_directive("hyper=off".parse()?);

            match &log_frmt[..] {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new()),
                        )
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer())
                        .init();
                }
            }

            Ok(Self { log_frmt })
        }
    }
}
