use std::collections::HashSet;

/// Upstream account identity and dispatch-relevant metadata. Mutated only
/// by admin paths external to this crate; the scheduler treats whatever it
/// is handed as an immutable snapshot for the duration of one `select`.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub platform: Platform,
    pub kind: AccountKind,
    pub concurrency: u32,
    /// Lower is better.
    pub priority: i32,
    pub schedulable: bool,
    pub model_whitelist: Option<HashSet<String>>,
    pub model_mapping: std::collections::HashMap<String, String>,
    pub supports_ws: bool,
    /// OAuth-only exception to the CLI-mode `store=false` contract: when
    /// set, an OAuth account's own `store` preference (not the client's)
    /// decides whether the upstream keeps continuation state.
    pub store_recovery_allowed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    OpenAi,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    OAuth,
    ApiKey,
}

impl Account {
    pub fn model_compatible(&self, requested_model: Option<&str>) -> bool {
        match (&self.model_whitelist, requested_model) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(set), Some(model)) => set.contains(model),
        }
    }

    pub fn rewrite_model<'a>(&'a self, requested: &'a str) -> &'a str {
        self.model_mapping
            .get(requested)
            .map(String::as_str)
            .unwrap_or(requested)
    }
}

/// Computed on demand by the concurrency limiter; never owned long-term.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccountLoadInfo {
    pub load_rate: f64,
    pub waiting_count: u32,
}
