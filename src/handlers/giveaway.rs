use crate::error::AppError;
use crate::models::*;
use crate::services::{CloseOutcome, GiveawayService};
use actix_web::{HttpResponse, ResponseError, Result, web};
use chrono::Duration;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/giveaways",
    tag = "giveaway",
    request_body = StartGiveawayRequest,
    responses(
        (status = 200, description = "抽奖已创建", body = StartGiveawayResponse),
        (status = 400, description = "持续时间或中奖人数不合法", body = ApiError)
    )
)]
/// 创建抽奖
pub async fn start_giveaway(
    service: web::Data<GiveawayService>,
    body: web::Json<StartGiveawayRequest>,
) -> Result<HttpResponse> {
    let req = body.into_inner();
    let Some(duration) = Duration::try_seconds(req.duration_secs) else {
        return Ok(AppError::InvalidDuration(format!(
            "duration_secs {} is out of range",
            req.duration_secs
        ))
        .error_response());
    };
    match service
        .start_giveaway(
            &req.scope_id,
            duration,
            &req.prize,
            req.winner_count,
            req.required_eligibility_id,
            req.host_id,
        )
        .await
    {
        Ok(id) => match service.get_giveaway(&id).await {
            Ok(record) => Ok(HttpResponse::Ok().json(ApiResponse::success(
                StartGiveawayResponse {
                    id,
                    ends_at: record.ends_at,
                },
            ))),
            Err(e) => Ok(e.error_response()),
        },
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/giveaways",
    tag = "giveaway",
    params(
        ("scope_id" = Option<String>, Query, description = "按频道过滤")
    ),
    responses(
        (status = 200, description = "抽奖列表", body = [GiveawayResponse])
    )
)]
pub async fn list_giveaways(
    service: web::Data<GiveawayService>,
    query: web::Query<GiveawayListQuery>,
) -> Result<HttpResponse> {
    let list: Vec<GiveawayResponse> = service
        .list_giveaways(query.scope_id.as_deref())
        .await
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(HttpResponse::Ok().json(ApiResponse::success(list)))
}

#[utoipa::path(
    get,
    path = "/giveaways/{id}",
    tag = "giveaway",
    params(("id" = Uuid, Path, description = "抽奖ID")),
    responses(
        (status = 200, description = "抽奖详情", body = GiveawayResponse),
        (status = 404, description = "抽奖不存在", body = ApiError)
    )
)]
pub async fn get_giveaway(
    service: web::Data<GiveawayService>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    match service.get_giveaway(&path.into_inner()).await {
        Ok(record) => Ok(HttpResponse::Ok().json(ApiResponse::success(GiveawayResponse::from(
            record,
        )))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/giveaways/{id}/end",
    tag = "giveaway",
    params(("id" = Uuid, Path, description = "抽奖ID")),
    responses(
        (status = 200, description = "已结束并抽出中奖者", body = WinnersResponse),
        (status = 404, description = "抽奖不存在", body = ApiError),
        (status = 409, description = "抽奖已结束", body = ApiError)
    )
)]
/// 提前结束抽奖（与定时关闭走同一逻辑）
pub async fn end_giveaway(
    service: web::Data<GiveawayService>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    match service.try_end_giveaway(&id).await {
        Ok(CloseOutcome::Ended(record)) => Ok(HttpResponse::Ok().json(ApiResponse::success(
            winners_response(record, false),
        ))),
        Ok(CloseOutcome::Deferred(_)) => match service.get_giveaway(&id).await {
            Ok(record) => Ok(HttpResponse::Accepted().json(ApiResponse::success_with_message(
                winners_response(record, true),
                "Closing accepted, winners will be drawn shortly",
            ))),
            Err(e) => Ok(e.error_response()),
        },
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/giveaways/{id}/reroll",
    tag = "giveaway",
    params(("id" = Uuid, Path, description = "抽奖ID")),
    request_body = RerollRequest,
    responses(
        (status = 200, description = "重新抽取成功", body = WinnersResponse),
        (status = 404, description = "抽奖不存在", body = ApiError),
        (status = 409, description = "抽奖尚未结束", body = ApiError)
    )
)]
pub async fn reroll_giveaway(
    service: web::Data<GiveawayService>,
    path: web::Path<Uuid>,
    body: Option<web::Json<RerollRequest>>,
) -> Result<HttpResponse> {
    let req = body.map(|b| b.into_inner()).unwrap_or_default();
    match service
        .try_reroll_giveaway(&path.into_inner(), req.exclude_previous)
        .await
    {
        Ok(record) => Ok(HttpResponse::Ok().json(ApiResponse::success(winners_response(
            record, false,
        )))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/giveaways/{id}/entries",
    tag = "giveaway",
    params(("id" = Uuid, Path, description = "抽奖ID")),
    request_body = EntryRequest,
    responses(
        (status = 200, description = "已参与（重复参与不报错）", body = EntryResponse),
        (status = 403, description = "不满足参与条件", body = ApiError),
        (status = 404, description = "抽奖不存在", body = ApiError),
        (status = 409, description = "抽奖已结束", body = ApiError)
    )
)]
pub async fn join_giveaway(
    service: web::Data<GiveawayService>,
    path: web::Path<Uuid>,
    body: web::Json<EntryRequest>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    match service.join(&id, &body.participant_id).await {
        Ok(changed) => entry_response(&service, &id, changed).await,
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    delete,
    path = "/giveaways/{id}/entries/{participant_id}",
    tag = "giveaway",
    params(
        ("id" = Uuid, Path, description = "抽奖ID"),
        ("participant_id" = String, Path, description = "参与者ID")
    ),
    responses(
        (status = 200, description = "已退出（未参与时为 no-op）", body = EntryResponse),
        (status = 404, description = "抽奖不存在", body = ApiError),
        (status = 409, description = "抽奖已结束", body = ApiError)
    )
)]
pub async fn leave_giveaway(
    service: web::Data<GiveawayService>,
    path: web::Path<(Uuid, String)>,
) -> Result<HttpResponse> {
    let (id, participant_id) = path.into_inner();
    match service.leave(&id, &participant_id).await {
        Ok(changed) => entry_response(&service, &id, changed).await,
        Err(e) => Ok(e.error_response()),
    }
}

async fn entry_response(
    service: &GiveawayService,
    id: &Uuid,
    changed: bool,
) -> Result<HttpResponse> {
    match service.get_giveaway(id).await {
        Ok(record) => Ok(HttpResponse::Ok().json(ApiResponse::success(EntryResponse {
            participant_count: record.participants.len(),
            changed,
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

fn winners_response(record: GiveawayRecord, pending: bool) -> WinnersResponse {
    WinnersResponse {
        id: record.id,
        state: record.state,
        winners: record.winners,
        reroll_count: record.reroll_count,
        pending,
    }
}

/// 路由配置
pub fn giveaway_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/giveaways")
            .route("", web::post().to(start_giveaway))
            .route("", web::get().to(list_giveaways))
            .route("/{id}", web::get().to(get_giveaway))
            .route("/{id}/end", web::post().to(end_giveaway))
            .route("/{id}/reroll", web::post().to(reroll_giveaway))
            .route("/{id}/entries", web::post().to(join_giveaway))
            .route(
                "/{id}/entries/{participant_id}",
                web::delete().to(leave_giveaway),
            ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStorage;
    use crate::external::{AllowAllGate, LogNotifier};
    use crate::services::{EntryTracker, GiveawayCoordinator, GiveawayStore, WinnerSelector};
    use crate::utils::SystemClock;
    use actix_web::{App, http::StatusCode, test};
    use std::sync::Arc;

    fn service() -> GiveawayService {
        let clock = Arc::new(SystemClock);
        let store = Arc::new(GiveawayStore::new(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            std::time::Duration::from_secs(1),
        ));
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        GiveawayService::new(
            store.clone(),
            EntryTracker::new(store.clone(), Arc::new(AllowAllGate)),
            GiveawayCoordinator::new(
                store,
                Arc::new(WinnerSelector::new()),
                Arc::new(LogNotifier),
                clock.clone(),
                Duration::seconds(60),
            ),
            clock,
            tx,
            &Default::default(),
        )
    }

    #[actix_web::test]
    async fn test_giveaway_http_flow() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(service()))
                .configure(giveaway_config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/giveaways")
            .set_json(serde_json::json!({
                "scope_id": "guild-1",
                "prize": "Headset",
                "duration_secs": 600,
                "winner_count": 1
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/giveaways/{id}/entries"))
            .set_json(serde_json::json!({ "participant_id": "alice" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["participant_count"], 1);

        let req = test::TestRequest::post()
            .uri(&format!("/giveaways/{id}/reroll"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri(&format!("/giveaways/{id}/end"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["winners"], serde_json::json!(["alice"]));

        let req = test::TestRequest::post()
            .uri(&format!("/giveaways/{id}/end"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri(&format!("/giveaways/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_start_giveaway_rejects_zero_winners() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(service()))
                .configure(giveaway_config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/giveaways")
            .set_json(serde_json::json!({
                "scope_id": "guild-1",
                "prize": "Headset",
                "duration_secs": 600,
                "winner_count": 0
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_start_giveaway_rejects_unrepresentable_duration() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(service()))
                .configure(giveaway_config),
        )
        .await;

        for duration_secs in [i64::MAX, i64::MIN] {
            let req = test::TestRequest::post()
                .uri("/giveaways")
                .set_json(serde_json::json!({
                    "scope_id": "guild-1",
                    "prize": "Headset",
                    "duration_secs": duration_secs,
                    "winner_count": 1
                }))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: serde_json::Value = test::read_body_json(resp).await;
            assert_eq!(body["success"], false);
        }
    }
}
