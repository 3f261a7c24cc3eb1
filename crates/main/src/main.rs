//! 主应用程序入口
//!
//! 以管理后台身份运行消息引擎：持续刷新会话列表，跟随命令行给出的会话，
//! 并把标准输入中形如 `<session-id> <text>` 的行作为客服回复发送出去。

use std::{env, sync::Arc};

use application::{
    ChatService, ChatServiceDependencies, Clock, MessageListener, SessionListListener,
    SystemClock,
};
use config::AppConfig;
use domain::{Message, Session, SessionId};
use infrastructure::HttpChatTransport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    tracing::info!(base_url = %config.transport.base_url, "加载配置完成");

    let transport = Arc::new(HttpChatTransport::new(&config.transport)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let chat_service = ChatService::new(ChatServiceDependencies {
        transport,
        clock,
        config: config.messaging,
    })?;

    let sessions_listener: SessionListListener = Arc::new(|sessions: &Vec<Session>| {
        let active = sessions.iter().filter(|session| session.is_active).count();
        tracing::info!(total = sessions.len(), active, "会话列表已更新");
    });
    chat_service.subscribe_to_admin_sessions(sessions_listener);

    for session_id in env::args().skip(1).map(SessionId::new) {
        let listener: MessageListener = {
            let session_id = session_id.clone();
            Arc::new(move |messages: &Vec<Message>| {
                if let Some(last) = messages.last() {
                    tracing::info!(
                        session_id = %session_id,
                        count = messages.len(),
                        last_from_admin = last.is_admin,
                        last = %last.content,
                        "会话消息已更新"
                    );
                }
            })
        };
        tracing::info!(session_id = %session_id, "开始跟随会话");
        chat_service.subscribe_to_session(&session_id, listener);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    let Some((session_id, text)) = line.trim().split_once(' ') else {
                        tracing::warn!("输入格式应为 `<session-id> <text>`");
                        continue;
                    };
                    chat_service.send(&SessionId::from(session_id), text.trim(), true);
                }
                // 标准输入关闭后只等待退出信号
                None => {
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }

    tracing::info!("收到退出信号，正在关闭");
    chat_service.teardown();

    Ok(())
}
