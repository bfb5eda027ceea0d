//! LLM API 客户端
//!
//! 封装所有与 LLM API 相关的调用逻辑，作为分类预言机的生产实现。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::clients::oracle::{ClassificationPrompt, Oracle};
use crate::config::Config;
use crate::error::OracleError;

/// LLM 客户端
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
    timeout_secs: u64,
}

impl LlmClient {
    /// 创建新的 LLM 客户端
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
            timeout_secs: config.call_timeout_secs,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// 发送聊天请求
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    ///
    /// # 返回
    /// 返回 LLM 的响应内容；内容为空时返回空串，由校验器判定为解析失败
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
    ) -> Result<String, OracleError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(|e| self.map_error(e))?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(|e| self.map_error(e))?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(|e| self.map_error(e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            self.map_error(e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if content.trim().is_empty() {
            warn!("LLM 返回内容为空");
        }

        Ok(content.trim().to_string())
    }

    /// 客户端错误 → 预言机错误分类
    fn map_error(&self, err: OpenAIError) -> OracleError {
        match err {
            OpenAIError::Reqwest(e) if e.is_timeout() => OracleError::Timeout {
                secs: self.timeout_secs,
            },
            OpenAIError::Reqwest(e) => match e.status().map(|s| s.as_u16()) {
                Some(429) => OracleError::RateLimited {
                    retry_after_secs: None,
                },
                Some(401) | Some(403) | Some(400) | Some(404) => {
                    OracleError::Rejected(e.to_string())
                }
                _ => OracleError::Network(e.to_string()),
            },
            OpenAIError::ApiError(api) => {
                let code = api.code.clone().unwrap_or_default();
                let kind = api.r#type.clone().unwrap_or_default();
                classify_api_error(&code, &kind, &api.message)
            }
            OpenAIError::InvalidArgument(msg) => OracleError::Rejected(msg),
            other => OracleError::Network(other.to_string()),
        }
    }
}

/// 按 API 错误的 code / type 判断是否可重试
fn classify_api_error(code: &str, kind: &str, message: &str) -> OracleError {
    let code = code.to_ascii_lowercase();
    let kind = kind.to_ascii_lowercase();

    if code == "insufficient_quota" || kind == "insufficient_quota" {
        return OracleError::Rejected(message.to_string());
    }
    if code.contains("rate_limit") || kind.contains("rate_limit") {
        return OracleError::RateLimited {
            retry_after_secs: parse_retry_after(message),
        };
    }
    if kind == "server_error" || code == "server_error" || kind == "overloaded_error" {
        return OracleError::Network(message.to_string());
    }
    OracleError::Rejected(message.to_string())
}

/// 从限流提示中提取等待秒数，例如 "Please try again in 20s"
fn parse_retry_after(message: &str) -> Option<u64> {
    let lower = message.to_ascii_lowercase();
    let tail = &lower[lower.find("try again in")? + "try again in".len()..];
    let digits: String = tail
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let secs: f64 = digits.parse().ok()?;
    Some(secs.ceil() as u64)
}

#[async_trait]
impl Oracle for LlmClient {
    async fn classify(&self, prompt: &ClassificationPrompt) -> Result<String, OracleError> {
        self.send_to_llm(&prompt.user, Some(&prompt.system)).await
    }
}
