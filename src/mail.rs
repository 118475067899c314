//! Send emails to users.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Mail;
use crate::error::{AccountError, Result};

const SERVICE: &str = "mail delivery";

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

/// Port for sending emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message to every address of `to`.
    ///
    /// `from` falls back to the mailer default sender when `None`.
    async fn send_mail(
        &self,
        subject: &str,
        body: &str,
        from: Option<&str>,
        to: &[&str],
    ) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    subject: &'a str,
    body: &'a str,
    from: Option<&'a str>,
    to: &'a [&'a str],
}

/// Mail queue manager.
///
/// Messages are published on a durable queue; a separate worker owns SMTP.
#[derive(Debug, Clone, Default)]
pub struct MailManager {
    queue: String,
    default_from: Option<String>,
    conn: Option<Arc<Connection>>,
}

impl MailManager {
    /// Create a new [`MailManager`].
    pub async fn new(config: &Mail) -> Result<Self> {
        let addr = Url::parse(&config.address)
            .map_err(|err| AccountError::external(SERVICE, err))?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme())
                .map_err(|err| AccountError::external(SERVICE, err))?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let conn_config = ConnectionProperties::default()
            .with_connection_name("beria_mail_client".into());
        let conn = Connection::connect_uri(uri, conn_config)
            .await
            .map_err(|err| AccountError::external(SERVICE, err))?;

        tracing::info!(%addr, queue = config.queue, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            default_from: config.default_from.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(
        conn: Arc<Connection>,
        queue: &str,
    ) -> std::result::Result<Channel, lapin::Error> {
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "com.beria.email",
            source: "com.beria.accounts",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }
}

#[async_trait]
impl Mailer for MailManager {
    async fn send_mail(
        &self,
        subject: &str,
        body: &str,
        from: Option<&str>,
        to: &[&str],
    ) -> Result<()> {
        let Some(conn) = &self.conn else {
            tracing::warn!(subject, "mail delivery is not configured");
            return Err(AccountError::external(
                SERVICE,
                "mail delivery is not configured",
            ));
        };

        let channel = Self::create_channel(Arc::clone(conn), &self.queue)
            .await
            .map_err(|err| AccountError::external(SERVICE, err))?;

        let content = Content {
            subject,
            body,
            from: from.or(self.default_from.as_deref()),
            to,
        };
        let payload = serde_json::to_vec(&Self::create_event(content))
            .map_err(|err| AccountError::external(SERVICE, err))?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await
            .map_err(|err| AccountError::external(SERVICE, err))?;

        tracing::trace!(subject, recipients = to.len(), "mail event sent");

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Message captured by [`RecordingMailer`].
    #[derive(Debug, Clone)]
    pub(crate) struct SentMail {
        pub subject: String,
        pub body: String,
        pub from: Option<String>,
        pub to: Vec<String>,
    }

    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        sent: Mutex<Vec<SentMail>>,
    }

    impl RecordingMailer {
        pub(crate) async fn sent(&self) -> Vec<SentMail> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_mail(
            &self,
            subject: &str,
            body: &str,
            from: Option<&str>,
            to: &[&str],
        ) -> Result<()> {
            self.sent.lock().await.push(SentMail {
                subject: subject.to_owned(),
                body: body.to_owned(),
                from: from.map(str::to_owned),
                to: to.iter().map(|s| s.to_string()).collect(),
            });
            Ok(())
        }
    }

    pub(crate) struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send_mail(
            &self,
            _subject: &str,
            _body: &str,
            _from: Option<&str>,
            _to: &[&str],
        ) -> Result<()> {
            Err(AccountError::external(SERVICE, "connection refused"))
        }
    }

    #[tokio::test]
    async fn test_unconfigured_manager_fails() {
        let err = MailManager::default()
            .send_mail("Hello", "Body", None, &["john@example.com"])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AccountError::ExternalService { service: SERVICE, .. }
        ));
    }

    #[test]
    fn test_cloudevent_payload() {
        let to = ["john@example.com"];
        let event = MailManager::create_event(Content {
            subject: "Hello",
            body: "Body",
            from: Some("noreply@example.com"),
            to: &to,
        });
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["specversion"], CLOUDEVENT_VERSION);
        assert_eq!(value["id"].as_str().unwrap().len(), ID_LENGTH);
        assert_eq!(value["data"]["to"][0], "john@example.com");
        assert_eq!(value["data"]["from"], "noreply@example.com");
    }
}
