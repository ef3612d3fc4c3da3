//! Credential handling for automation hooks.
//!
//! Resolves the tower host and token that AnsibleJobs authenticate with.

mod credentials;

pub use credentials::{
    HOST_KEY, TOKEN_KEY, TowerCredentials, TowerCredentialsResolver, parse_tower_secret,
};
