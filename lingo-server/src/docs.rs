use std::borrow::BorrowMut;

use axum::{response::IntoResponse, Json};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{
    auth, conversations, dashboards, personas, proxy, schemas, serialized, sessions, users,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::register,
        auth::login,
        auth::exchange,
        auth::user,
        users::profile,
        users::update_profile,
        users::complete_onboarding,
        users::delete_account,
        users::streak,
        dashboards::list_dashboards,
        dashboards::create_dashboard,
        dashboards::dashboard,
        dashboards::update_dashboard,
        dashboards::delete_dashboard,
        dashboards::set_primary,
        conversations::list_conversations,
        conversations::create_conversation,
        conversations::conversation,
        conversations::delete_conversation,
        conversations::update_title,
        conversations::update_synopsis,
        conversations::update_persona,
        conversations::summarize,
        conversations::messages,
        conversations::add_message,
        conversations::attach_feedback,
        personas::list_personas,
        personas::create_persona,
        personas::persona,
        personas::update_persona,
        personas::delete_persona,
        sessions::save_session,
        sessions::latest_session,
        proxy::analyze,
        proxy::transcribe,
        proxy::tts,
        proxy::feedback,
        proxy::suggestions,
        proxy::translation,
        proxy::quick_translation,
        proxy::explain_suggestion,
        proxy::initial_message,
    ),
    components(schemas(
        schemas::LoginSchema,
        schemas::RegisterSchema,
        schemas::ExchangeSchema,
        schemas::ProfileSchema,
        schemas::OnboardingSchema,
        schemas::NewDashboardSchema,
        schemas::DashboardSettingsSchema,
        schemas::NewConversationSchema,
        schemas::TitleSchema,
        schemas::SynopsisSchema,
        schemas::ConversationPersonaSchema,
        schemas::NewMessageSchema,
        schemas::MessageFeedbackSchema,
        schemas::PersonaSchema,
        schemas::ChatSessionSchema,
        schemas::ProxySchema,
        serialized::ErrorBody,
        serialized::User,
        serialized::LoginResult,
        serialized::LanguageDashboard,
        serialized::OnboardingResult,
        serialized::Persona,
        serialized::Conversation,
        serialized::ConversationDetail,
        serialized::Message,
        serialized::Streak,
        serialized::ChatSession,
        proxy::AnalysisResult,
        proxy::SpeechResult,
    )),
    modifiers(&Security),
    info(
        title = "lingo",
        description = "lingo exposes endpoints for practicing languages through conversations with an AI partner"
    )
)]
pub struct ApiDoc;

struct Security;

impl Modify for Security {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.borrow_mut() {
            let scheme = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .build();

            components.add_security_scheme("BearerAuth", SecurityScheme::Http(scheme))
        }
    }
}

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
