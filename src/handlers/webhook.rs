use crate::models::{ApiResponse, EntryEvent};
use crate::services::GiveawayService;
use actix_web::{HttpResponse, ResponseError, Result, web};
use log::{debug, warn};

/// 入场事件 webhook
///
/// 外部通知源（例如聊天平台的按钮/反应事件）推送参与者加入或退出。
/// 事件进入队列后立即返回 202，由后台消费者按顺序处理。
pub async fn entry_event_webhook(
    service: web::Data<GiveawayService>,
    body: web::Json<EntryEvent>,
) -> Result<HttpResponse> {
    let event = body.into_inner();
    if event.participant_id.trim().is_empty() {
        warn!("Entry event without participant id for giveaway {}", event.giveaway_id);
        return Ok(HttpResponse::BadRequest().json(serde_json::json!({
            "success": false,
            "error": {
                "code": "VALIDATION_ERROR",
                "message": "participant_id is required"
            }
        })));
    }

    debug!(
        "Received entry event: giveaway={} participant={} added={}",
        event.giveaway_id, event.participant_id, event.added
    );

    match service
        .on_entry_event(event.giveaway_id, &event.participant_id, event.added)
        .await
    {
        Ok(()) => Ok(HttpResponse::Accepted().json(ApiResponse::success(serde_json::json!({
            "received": true
        })))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn webhook_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/webhooks").route("/entry-events", web::post().to(entry_event_webhook)),
    );
}
