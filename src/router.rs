//! Selects the Telegram target responsible for an application

use crate::config::{FormattingOptions, Target, TelegramConfig};

/// Immutable routing snapshot: ordered targets, the default, global options
#[derive(Debug, Clone)]
pub struct RoutingTable {
    targets: Vec<Target>,
    default: Target,
    format: FormattingOptions,
}

impl RoutingTable {
    pub fn new(targets: Vec<Target>, default: Target, format: FormattingOptions) -> Self {
        Self {
            targets,
            default,
            format,
        }
    }

    /// Pick the target for `app_id` together with its effective options
    pub fn route(&self, app_id: u32) -> (&Target, &FormattingOptions) {
        let target = select_target(app_id, &self.targets, &self.default);
        (target, target.format_or(&self.format))
    }

    pub fn default_target(&self) -> &Target {
        &self.default
    }
}

impl From<&TelegramConfig> for RoutingTable {
    fn from(config: &TelegramConfig) -> Self {
        Self::new(
            config.targets.clone(),
            config.default_target(),
            config.format.clone(),
        )
    }
}

/// First target (in declaration order) claiming `app_id`, else `default`
pub fn select_target<'a>(app_id: u32, targets: &'a [Target], default: &'a Target) -> &'a Target {
    for target in targets {
        if target.claims(app_id) {
            tracing::debug!(app_id = app_id, target = %target.name, "Matched routing target");
            return target;
        }
    }

    tracing::warn!(
        app_id = app_id,
        "No rule found for app_id {}, using default target",
        app_id
    );
    default
}
