// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Logging setup for applications embedding the stack.

use anyhow::Result;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Build the filter from `RUST_LOG` when it is set, otherwise from the
/// configured directive. The configured directive must parse either way.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(env.as_deref(), config)
}

fn filter_from(env: Option<&str>, config: &LoggingConfig) -> Result<EnvFilter> {
    let directive: Directive = config.filter.parse()?;
    match env.filter(|env| !env.trim().is_empty()) {
        Some(env) => Ok(EnvFilter::try_new(env)?),
        None => Ok(EnvFilter::default().add_directive(directive)),
    }
}

/// Install a global `fmt` subscriber.
///
/// Fails if the directive does not parse or a subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter(config)?)
        .try_init()?;
    Ok(())
}
