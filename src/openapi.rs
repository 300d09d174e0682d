//! OpenAPI surface aggregation, mounted at `/api/docs` when
//! `ENABLE_API_DOCS=true`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::users::register,
        crate::users::find_by_username,
        crate::users::find_by_id,
        crate::users::rotate_identity,
        crate::auth::handlers::issue_challenge,
        crate::auth::handlers::verify_challenge,
        crate::auth::handlers::logout,
        crate::keys::upload_signed_pre_key,
        crate::keys::upload_one_time_pre_keys,
        crate::keys::get_bundle,
        crate::keys::count_one_time_pre_keys,
        crate::relay::send,
        crate::relay::fetch_offline,
        crate::relay::ack_delete,
        crate::files::upload,
        crate::api::health_check,
    ),
    components(schemas(
        crate::db::models::User,
        crate::db::models::Device,
        crate::db::models::SignedPreKey,
        crate::db::models::OneTimePreKey,
        crate::db::models::MessageType,
        crate::users::RegisterRequest,
        crate::users::RotateIdentityRequest,
        crate::auth::handlers::ChallengeRequest,
        crate::auth::handlers::ChallengeResponse,
        crate::auth::handlers::VerifyRequest,
        crate::auth::handlers::VerifyResponse,
        crate::keys::UploadSignedPreKeyRequest,
        crate::keys::OneTimePreKeyInput,
        crate::keys::UploadOneTimePreKeysRequest,
        crate::keys::PreKeyBundle,
        crate::keys::SignedPreKeyView,
        crate::keys::OneTimePreKeyView,
        crate::keys::OneTimeKeyCount,
        crate::relay::SendRequest,
        crate::relay::SendResponse,
        crate::relay::QueuedMessageView,
        crate::relay::AckDeleteRequest,
        crate::files::UploadedFile,
        crate::api::HealthResponse,
    )),
    tags(
        (name = "users", description = "User directory (C0)"),
        (name = "auth", description = "Authentication engine (C3)"),
        (name = "keys", description = "Key-directory engine (C4)"),
        (name = "messages", description = "Relay engine (C6)"),
        (name = "files", description = "Blob-store collaborator"),
        (name = "health", description = "Liveness probe"),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}
