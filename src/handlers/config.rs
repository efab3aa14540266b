use crate::{config::AppConfig, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`. Credentials are reported only as `api_key_set`.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": redacted(&state.config)
    })))
}

fn redacted(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "pipeline": {
            "system_prompt": config.pipeline.system_prompt,
            "temperature": config.pipeline.temperature,
            "speech_speed": config.pipeline.speech_speed,
            "speech_pitch": config.pipeline.speech_pitch,
            "input_sample_rate": config.pipeline.input_sample_rate,
            "input_channels": config.pipeline.input_channels,
            "min_endpointing_delay": config.pipeline.min_endpointing_delay,
            "max_endpointing_delay": config.pipeline.max_endpointing_delay
        },
        "stt": {
            "provider": config.stt.provider,
            "model_size": config.stt.model_size,
            "language": config.stt.language,
            "device": config.stt.device,
            "preload": config.stt.preload,
            "api_base": config.stt.api_base,
            "api_model": config.stt.api_model,
            "api_key_set": !config.stt.api_key.is_empty()
        },
        "llm": {
            "provider": config.llm.provider,
            "model": config.llm.model,
            "api_base": config.llm.api_base,
            "max_tokens": config.llm.max_tokens,
            "api_key_set": !config.llm.api_key.is_empty()
        },
        "tts": {
            "provider": config.tts.provider,
            "voice_id": config.tts.voice_id,
            "model_id": config.tts.model_id,
            "default_language": config.tts.default_language,
            "api_base": config.tts.api_base,
            "api_key_set": !config.tts.api_key.is_empty()
        },
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_are_never_echoed() {
        let mut config = AppConfig::default();
        config.llm.api_key = "sk-very-secret".to_string();
        config.tts.api_key = "tts-secret".to_string();

        let value = redacted(&config);
        let text = value.to_string();

        assert!(!text.contains("sk-very-secret"));
        assert!(!text.contains("tts-secret"));
        assert_eq!(value["llm"]["api_key_set"], true);
        assert_eq!(value["stt"]["api_key_set"], false);
        assert_eq!(value["performance"]["max_concurrent_sessions"], 10);
    }
}
