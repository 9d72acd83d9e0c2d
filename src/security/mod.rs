pub mod command_executor;
pub mod token_manager;

pub use command_executor::{CommandError, SafeCommandExecutor};
pub use token_manager::{GitCredentials, mask_secrets_in, mask_token};
