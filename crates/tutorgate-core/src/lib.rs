pub mod bootstrap;
pub mod dispatcher;
pub mod error;
pub mod payload;
pub mod relay;
pub mod request;
pub mod upstream_client;

pub use bootstrap::{Bootstrap, CliArgs, bootstrap, bootstrap_from_env, build_dispatcher};
pub use dispatcher::RequestDispatcher;
pub use error::DispatchError;
pub use payload::{DEFAULT_SYSTEM_PROMPT, PayloadConfig, build_generate_request};
pub use relay::{ChatStream, FragmentReader, spawn_relay};
pub use request::{ChatRequest, InlineImage};
pub use upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
