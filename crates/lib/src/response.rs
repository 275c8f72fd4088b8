//! Response: the envelope a listener callback works with.
//!
//! Joins the robot, the message being handled and the match data. Outbound
//! helpers run the response middleware chain and then hand the strings to the
//! adapter, addressed back to the message's room and user.

use std::fmt;
use std::sync::Arc;

use crate::adapters::{deliver, AdapterError, SendMethod};
use crate::listener::Matches;
use crate::message::{Envelope, Message};
use crate::middleware::{ChainOutcome, ResponseContext};
use crate::robot::Robot;

#[derive(Clone)]
pub struct Response {
    robot: Arc<Robot>,
    message: Arc<Message>,
    matches: Matches,
}

impl Response {
    pub fn new(robot: Arc<Robot>, message: Arc<Message>, matches: Matches) -> Self {
        Self {
            robot,
            message,
            matches,
        }
    }

    pub fn robot(&self) -> &Arc<Robot> {
        &self.robot
    }

    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    pub fn matches(&self) -> &[Option<String>] {
        &self.matches
    }

    /// Capture group `index` (0 is the whole match), if it participated.
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.matches.get(index).and_then(|m| m.as_deref())
    }

    pub fn envelope(&self) -> Envelope {
        Envelope::for_message(&self.message)
    }

    /// Same response, pointed at the original message when this one is a catch-all.
    pub(crate) fn into_original(self) -> Self {
        match self.message.original() {
            Some(inner) => Self {
                message: Arc::clone(inner),
                ..self
            },
            None => self,
        }
    }

    pub async fn send<I, S>(&self, strings: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_with_middleware(SendMethod::Send, true, collect(strings)).await
    }

    pub async fn emote<I, S>(&self, strings: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_with_middleware(SendMethod::Emote, true, collect(strings)).await
    }

    pub async fn reply<I, S>(&self, strings: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_with_middleware(SendMethod::Reply, true, collect(strings)).await
    }

    pub async fn topic<I, S>(&self, strings: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_with_middleware(SendMethod::Topic, true, collect(strings)).await
    }

    pub async fn play<I, S>(&self, strings: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_with_middleware(SendMethod::Play, false, collect(strings)).await
    }

    pub async fn locked<I, S>(&self, strings: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_with_middleware(SendMethod::Locked, true, collect(strings)).await
    }

    /// Run the response chain, then deliver whatever strings survive it.
    /// An aborted chain sends nothing and is not an error.
    async fn run_with_middleware(
        &self,
        method: SendMethod,
        plaintext: bool,
        strings: Vec<String>,
    ) -> Result<(), AdapterError> {
        let context = ResponseContext {
            response: self.clone(),
            strings,
            method,
            plaintext,
        };
        let outcome = self
            .robot
            .middleware()
            .response
            .execute(context, |context| async move {
                if context.strings.is_empty() {
                    return Ok(());
                }
                let envelope = context.response.envelope();
                deliver(
                    context.response.robot.adapter().as_ref(),
                    context.method,
                    &envelope,
                    &context.strings,
                )
                .await
            })
            .await;
        match outcome {
            ChainOutcome::Completed(result) => result,
            ChainOutcome::Aborted => Ok(()),
        }
    }

    /// Pick one item at random.
    pub fn random<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let mut buf = [0u8; 8];
        if let Err(e) = getrandom::getrandom(&mut buf) {
            log::warn!("random: no entropy available ({}), using first item", e);
        }
        let index = (u64::from_le_bytes(buf) % items.len() as u64) as usize;
        items.get(index)
    }

    /// Mark the message done so no further listeners are attempted.
    pub fn finish(&self) {
        self.message.finish();
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("message", &self.message)
            .field("matches", &self.matches)
            .finish()
    }
}

fn collect<I, S>(strings: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    strings.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::NullAdapter;
    use crate::message::User;

    fn response() -> Response {
        let robot = Robot::new("Hal", None, Arc::new(NullAdapter));
        let message = Arc::new(Message::text(User::new("1"), "set mode to fast", None));
        Response::new(
            robot,
            message,
            vec![Some("set mode to fast".into()), Some("mode".into()), None],
        )
    }

    #[test]
    fn random_on_empty_is_none() {
        let items: [&str; 0] = [];
        assert_eq!(response().random(&items), None);
    }

    #[test]
    fn random_picks_from_items() {
        let res = response();
        let items = ["open", "close", "hold"];
        for _ in 0..50 {
            let pick = res.random(&items).unwrap();
            assert!(items.contains(pick));
        }
        assert_eq!(res.random(&["only"]), Some(&"only"));
    }

    #[test]
    fn capture_skips_missing_groups() {
        let res = response();
        assert_eq!(res.capture(1), Some("mode"));
        assert_eq!(res.capture(2), None);
        assert_eq!(res.capture(9), None);
    }

    #[test]
    fn into_original_unwraps_catch_all() {
        let res = response();
        let original = Arc::clone(res.message());
        let wrapped = Response::new(
            Arc::clone(res.robot()),
            Arc::new(Message::catch_all(Arc::clone(&original))),
            Vec::new(),
        );
        assert!(Arc::ptr_eq(wrapped.into_original().message(), &original));
    }

    #[test]
    fn finish_marks_message_done() {
        let res = response();
        res.finish();
        assert!(res.message().is_done());
    }
}
