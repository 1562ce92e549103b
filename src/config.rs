use std::time::Duration;

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Debug, Clone)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum, default_value = "development")]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "3000")]
    pub port: u16,

    // catalog site, every search/episode/play url is built from this
    #[clap(long, env, default_value = "https://animepahe.si")]
    pub catalog_base_url: String,

    // this should be either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // timeout for catalog json and html pages
    #[clap(long, env, default_value = "30")]
    pub fetch_timeout_secs: u64,

    // stream host pages get their own, shorter timeout
    #[clap(long, env, default_value = "20")]
    pub resolve_timeout_secs: u64,

    #[clap(long, env, default_value = "30")]
    pub relay_timeout_secs: u64,

    #[clap(long, env, default_value = "5")]
    pub relay_max_redirects: usize,

    // where the relay is mounted, rewritten manifests point back here
    #[clap(long, env, default_value = "/proxy")]
    pub relay_route: String,

    // the sandbox runtime, needs to be node 20+ if permissions are on
    #[clap(long, env, default_value = "node")]
    pub node_binary: String,

    #[clap(long, env, default_value = "10")]
    pub sandbox_timeout_secs: u64,

    // runs node with its permission model so the script can only read itself
    #[clap(long, env, default_value = "true", action = clap::ArgAction::Set)]
    pub sandbox_permissions: bool,

    // v8 old space cap for the sandbox process, in MB
    #[clap(long, env, default_value = "64")]
    pub sandbox_max_heap_mb: u32,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl AppConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs)
    }
}

impl Default for AppConfig {
    // mirrors the clap defaults, mostly used by tests
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 3000,
            catalog_base_url: "https://animepahe.si".to_string(),
            cors_origin: "*".to_string(),
            fetch_timeout_secs: 30,
            resolve_timeout_secs: 20,
            relay_timeout_secs: 30,
            relay_max_redirects: 5,
            relay_route: "/proxy".to_string(),
            node_binary: "node".to_string(),
            sandbox_timeout_secs: 10,
            sandbox_permissions: true,
            sandbox_max_heap_mb: 64,
            sentry_dsn: None,
        }
    }
}
