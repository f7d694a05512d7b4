use actix_web::web;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;
use crate::models::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::giveaway::start_giveaway,
        handlers::giveaway::list_giveaways,
        handlers::giveaway::get_giveaway,
        handlers::giveaway::end_giveaway,
        handlers::giveaway::reroll_giveaway,
        handlers::giveaway::join_giveaway,
        handlers::giveaway::leave_giveaway,
    ),
    components(
        schemas(
            GiveawayState,
            StartGiveawayRequest,
            StartGiveawayResponse,
            RerollRequest,
            EntryRequest,
            EntryEvent,
            GiveawayListQuery,
            GiveawayResponse,
            WinnersResponse,
            EntryResponse,
            ApiError,
        )
    ),
    tags(
        (name = "giveaway", description = "Giveaway lifecycle API"),
    ),
    info(
        title = "Giveaway Engine API",
        version = "0.1.0",
        description = "Timed giveaways: entries, scheduled closing, winner selection and rerolls"
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}
