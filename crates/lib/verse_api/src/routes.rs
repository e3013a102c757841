//! Route paths.

pub const GET_API_HEALTH: &str = "/api/health";
pub const POST_AUTH_REGISTER: &str = "/auth/register";
pub const POST_AUTH_LOGIN: &str = "/auth/login";
pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
pub const POST_AUTH_FORGOT_PASSWORD: &str = "/auth/forgot-password";
pub const POST_AUTH_RESET_PASSWORD: &str = "/auth/reset-password";
pub const POST_AUTH_VERIFY_TOKEN: &str = "/auth/verify-token";
pub const POST_AUTH_MIGRATE: &str = "/auth/migrate";
pub const GET_AUTH_MIGRATION_STATUS: &str = "/auth/migration-status";
pub const GET_AUTH_ME: &str = "/auth/me";
