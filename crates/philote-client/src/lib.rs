//! `philote-client` — drive a remote Philote discipline.
//!
//! ```no_run
//! use philote_client::ExplicitClient;
//! use philote_net::Channel;
//! use philote_types::config::ClientConfig;
//! use philote_types::{DisciplineOptions, Variable, VariableType, Variables};
//!
//! # async fn demo() -> philote_types::Result<()> {
//! let channel = Channel::tcp("127.0.0.1:50051".parse().unwrap());
//! let mut client = ExplicitClient::new(channel, ClientConfig::from_env()?);
//! client.negotiate(&DisciplineOptions::new()).await?;
//!
//! let mut inputs = Variables::new();
//! inputs.insert("x".into(), Variable::scalar(VariableType::Input, 1.0));
//! let outputs = client.compute_function(&inputs).await?;
//! println!("f = {}", outputs["f"][0]);
//! # Ok(())
//! # }
//! ```

pub mod discipline;
pub mod explicit;
pub mod implicit;

pub use discipline::DisciplineClient;
pub use explicit::ExplicitClient;
pub use implicit::ImplicitClient;
