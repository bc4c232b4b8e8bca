//! Session CRUD endpoints.

use chatbot_api::{CancelOutcome, ClearOutcome, CreateSession, Error, Message, Result, Session};

use crate::HttpClient;

impl HttpClient {
    /// `POST /sessions` for the configured user.
    pub async fn create_session(&self, title: Option<String>) -> Result<Session> {
        let body = CreateSession {
            user_id: Some(self.state.user_id.clone()),
            title,
        };
        let session: Session = self
            .state
            .post_json(self.state.endpoint(&["sessions"])?, &body)
            .await?;
        tracing::debug!(session_id = %session.id, "created session");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.state
            .get_json(self.state.endpoint(&["sessions", session_id])?)
            .await
    }

    /// `GET /sessions?user_id=`; `None` lists the configured user's sessions.
    pub async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<Session>> {
        let mut url = self.state.endpoint(&["sessions"])?;
        url.query_pairs_mut()
            .append_pair("user_id", user_id.unwrap_or(self.state.user_id.as_str()));
        self.state.get_json(url).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.state
            .delete(self.state.endpoint(&["sessions", session_id])?)
            .await?;
        Ok(())
    }

    /// Delete every message of a session, keeping the session itself.
    pub async fn clear_session(&self, session_id: &str) -> Result<ClearOutcome> {
        let resp = self
            .state
            .delete(self.state.endpoint(&["sessions", session_id, "clear"])?)
            .await?;
        let bytes = resp.bytes().await.map_err(Error::http)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.state
            .get_json(self.state.endpoint(&["sessions", session_id, "messages"])?)
            .await
    }

    /// Ask the server to stop the generation running for `session_id`.
    ///
    /// The server answers `success: false` when nothing was running.
    pub async fn cancel_session(&self, session_id: &str) -> Result<CancelOutcome> {
        self.state
            .post_json(
                self.state.endpoint(&["sessions", session_id, "cancel"])?,
                &serde_json::Value::Null,
            )
            .await
    }
}
