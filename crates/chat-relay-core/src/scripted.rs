//! In-memory stand-in for the chat application, driven by a script.
//!
//! `ScriptedPage` interprets the configured [`Selectors`] against a small
//! semantic model (login form, chats, message rows, unread markers and
//! notification badges) instead of a real DOM. Messages pushed into a chat
//! that is not open get an unread marker and a badge, like the real app.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    config::Selectors,
    model::ChatId,
    network::NetworkResponse,
    surface::{ElementHandle, PageSurface, SurfaceError},
};

/// URL the scripted app uses for its API traffic.
pub const SCRIPTED_APP_URL: &str = "https://gw.line.naver.jp/enc";

/// How the app reacts to the login submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginScript {
    Success,
    InvalidCredentials,
    DuplicateSession,
    /// Show `code`; the login completes once [`ScriptedPage::confirm_verification`] is called.
    Verification { code: String },
    /// Show nothing recognisable.
    Unrecognized,
}

/// Body of a scripted message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Image,
    Sticker,
}

/// One child of a conversation's message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Message {
        id: Option<String>,
        sender: Option<String>,
        time: Option<String>,
        body: Body,
    },
    /// Non-message sibling such as a date separator.
    Notice(String),
}

impl Row {
    #[must_use]
    pub fn text(id: &str, sender: &str, time: &str, text: &str) -> Self {
        Self::Message {
            id: Some(id.to_string()),
            sender: Some(sender.to_string()),
            time: Some(time.to_string()),
            body: Body::Text(text.to_string()),
        }
    }

    #[must_use]
    pub fn image(id: &str, sender: &str, time: &str) -> Self {
        Self::Message {
            id: Some(id.to_string()),
            sender: Some(sender.to_string()),
            time: Some(time.to_string()),
            body: Body::Image,
        }
    }

    #[must_use]
    pub fn sticker(id: &str, sender: &str, time: &str) -> Self {
        Self::Message {
            id: Some(id.to_string()),
            sender: Some(sender.to_string()),
            time: Some(time.to_string()),
            body: Body::Sticker,
        }
    }

    #[must_use]
    pub fn notice(text: &str) -> Self {
        Self::Notice(text.to_string())
    }

    const fn is_message(&self) -> bool {
        matches!(self, Self::Message { .. })
    }
}

#[derive(Debug)]
struct ScriptedChat {
    id: ChatId,
    rows: Vec<Row>,
    unread_from: Option<usize>,
    badge: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Author,
    Time,
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    LoginSection,
    Popup,
    PopupButton,
    LoginButton,
    AppContent,
    LoginFailed,
    AnotherApp,
    VerificationCode,
    MessagesList,
    Unread { chat: usize },
    Row { chat: usize, index: usize },
    RowPart { chat: usize, index: usize, part: Part },
    ChatEntry { chat: usize },
    Badge { chat: usize },
}

#[derive(Debug)]
struct PageState {
    selectors: Selectors,
    responses: broadcast::Sender<NetworkResponse>,
    fail_open: bool,
    opened: bool,
    released: bool,
    popup_label: Option<String>,
    login: LoginScript,
    email: String,
    password: String,
    submitted: bool,
    authenticated: bool,
    chats: Vec<ScriptedChat>,
    active: Option<usize>,
    notification_scans: usize,
    chat_switches: Vec<ChatId>,
}

impl PageState {
    fn chat_index(&self, id: &ChatId) -> Option<usize> {
        self.chats.iter().position(|c| &c.id == id)
    }

    fn children(&self, chat: usize) -> Vec<Node> {
        let chat_state = &self.chats[chat];
        let mut nodes = Vec::with_capacity(chat_state.rows.len() + 1);
        for index in 0..chat_state.rows.len() {
            if chat_state.unread_from == Some(index) {
                nodes.push(Node::Unread { chat });
            }
            nodes.push(Node::Row { chat, index });
        }
        nodes
    }

    fn message_rows(&self, chat: usize) -> impl Iterator<Item = Node> + '_ {
        self.chats[chat]
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.is_message())
            .map(move |(index, _)| Node::Row { chat, index })
    }

    fn ensure_attached(&self, node: Node) -> Result<(), SurfaceError> {
        match node {
            Node::Unread { chat } | Node::Row { chat, .. } | Node::RowPart { chat, .. }
                if self.active != Some(chat) =>
            {
                Err(SurfaceError::Detached)
            }
            _ => Ok(()),
        }
    }

    fn row(&self, chat: usize, index: usize) -> &Row {
        &self.chats[chat].rows[index]
    }

    fn find(&self, selector: &str) -> Option<Node> {
        let s = &self.selectors;
        let signed_out = self.opened && !self.authenticated;

        if selector == s.login_section {
            signed_out.then_some(Node::LoginSection)
        } else if selector == s.popup {
            (self.opened && self.popup_label.is_some()).then_some(Node::Popup)
        } else if selector == s.login_button {
            (signed_out && !self.email.is_empty() && !self.password.is_empty())
                .then_some(Node::LoginButton)
        } else if selector == s.app_content {
            self.authenticated.then_some(Node::AppContent)
        } else if selector == s.login_failed_message {
            (self.submitted && self.login == LoginScript::InvalidCredentials)
                .then_some(Node::LoginFailed)
        } else if selector == s.another_app_open_message {
            (self.submitted && self.login == LoginScript::DuplicateSession)
                .then_some(Node::AnotherApp)
        } else if selector == s.verification_code_message {
            (signed_out && self.submitted && matches!(self.login, LoginScript::Verification { .. }))
                .then_some(Node::VerificationCode)
        } else if selector == s.messages_list {
            self.active.map(|_| Node::MessagesList)
        } else if selector == s.unread_messages_notice {
            let chat = self.active?;
            self.chats[chat]
                .unread_from
                .map(|_| Node::Unread { chat })
        } else if selector == s.active_chat_entry {
            self.active.map(|chat| Node::ChatEntry { chat })
        } else if selector == s.notification_icon {
            self.badges().into_iter().next()
        } else if selector == s.messages_in_list() {
            let chat = self.active?;
            self.message_rows(chat).next()
        } else if let Some(id) = parse_message_id(s, selector) {
            let chat = self.active?;
            self.chats[chat]
                .rows
                .iter()
                .position(|row| {
                    matches!(row, Row::Message { id: Some(row_id), .. } if row_id == id)
                })
                .map(|index| Node::Row { chat, index })
        } else {
            None
        }
    }

    fn find_all(&mut self, selector: &str) -> Vec<Node> {
        if selector == self.selectors.notification_icon {
            self.notification_scans += 1;
            self.badges()
        } else if selector == self.selectors.messages_in_list() {
            match self.active {
                Some(chat) => self.message_rows(chat).collect(),
                None => Vec::new(),
            }
        } else {
            self.find(selector).into_iter().collect()
        }
    }

    fn badges(&self) -> Vec<Node> {
        if !self.authenticated {
            return Vec::new();
        }
        self.chats
            .iter()
            .enumerate()
            .filter(|(_, chat)| chat.badge)
            .map(|(chat, _)| Node::Badge { chat })
            .collect()
    }

    fn switch_to(&mut self, chat: usize) {
        if let Some(previous) = self.active {
            self.chats[previous].unread_from = None;
        }
        self.active = Some(chat);
        self.chats[chat].badge = false;
        self.chat_switches.push(self.chats[chat].id.clone());
    }

    fn submit(&mut self) {
        self.submitted = true;
        if self.login == LoginScript::Success {
            self.authenticated = true;
        }
        let _ = self
            .responses
            .send(NetworkResponse::new(SCRIPTED_APP_URL, 200));
    }
}

fn parse_message_id<'a>(selectors: &Selectors, selector: &'a str) -> Option<&'a str> {
    let prefix = format!("{}[{}='", selectors.message, selectors.message_id_attribute);
    selector.strip_prefix(prefix.as_str())?.strip_suffix("']")
}

fn lock(state: &Mutex<PageState>) -> MutexGuard<'_, PageState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted fake of the chat application.
#[derive(Debug, Clone)]
pub struct ScriptedPage {
    state: Arc<Mutex<PageState>>,
}

impl ScriptedPage {
    /// A page with default selectors that reacts to login as `login` says.
    #[must_use]
    pub fn new(login: LoginScript) -> Self {
        Self::with_selectors(login, Selectors::default())
    }

    #[must_use]
    pub fn with_selectors(login: LoginScript, selectors: Selectors) -> Self {
        let (responses, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(PageState {
                selectors,
                responses,
                fail_open: false,
                opened: false,
                released: false,
                popup_label: None,
                login,
                email: String::new(),
                password: String::new(),
                submitted: false,
                authenticated: false,
                chats: Vec::new(),
                active: None,
                notification_scans: 0,
                chat_switches: Vec::new(),
            })),
        }
    }

    /// Pretend the login page is already authenticated, skipping the form.
    #[must_use]
    pub fn signed_in(self) -> Self {
        lock(&self.state).authenticated = true;
        self
    }

    /// Show an interstitial popup whose button reads `label`.
    #[must_use]
    pub fn with_popup(self, label: &str) -> Self {
        lock(&self.state).popup_label = Some(label.to_string());
        self
    }

    /// Make `open` fail as if the browser could not load the page.
    #[must_use]
    pub fn failing_open(self) -> Self {
        lock(&self.state).fail_open = true;
        self
    }

    /// Add an empty chat to the chat list.
    #[must_use]
    pub fn with_chat(self, id: &str) -> Self {
        lock(&self.state).chats.push(ScriptedChat {
            id: ChatId::new(id),
            rows: Vec::new(),
            unread_from: None,
            badge: false,
        });
        self
    }

    /// Open `id` in the conversation pane without recording a switch.
    ///
    /// # Panics
    /// Panics if the chat was not added.
    #[must_use]
    pub fn with_open_chat(self, id: &str) -> Self {
        {
            let mut state = lock(&self.state);
            let chat = state.chat_index(&ChatId::new(id)).expect("unknown chat");
            state.active = Some(chat);
        }
        self
    }

    /// Append a row to a chat. Rows landing in a closed chat get an unread
    /// marker (if none yet) and raise the chat's badge.
    ///
    /// # Panics
    /// Panics if the chat was not added.
    pub fn push(&self, chat: &str, row: Row) {
        let mut state = lock(&self.state);
        let index = state.chat_index(&ChatId::new(chat)).expect("unknown chat");
        let is_active = state.active == Some(index);
        let target = &mut state.chats[index];
        target.rows.push(row);
        if !is_active {
            if target.unread_from.is_none() {
                target.unread_from = Some(target.rows.len() - 1);
            }
            target.badge = true;
        }
    }

    /// Remove the message row carrying `id`, as when the app stops
    /// rendering old history. Returns whether a row was removed.
    ///
    /// # Panics
    /// Panics if the chat was not added.
    pub fn remove(&self, chat: &str, id: &str) -> bool {
        let mut state = lock(&self.state);
        let index = state.chat_index(&ChatId::new(chat)).expect("unknown chat");
        let target = &mut state.chats[index];
        let Some(position) = target.rows.iter().position(|row| {
            matches!(row, Row::Message { id: Some(row_id), .. } if row_id == id)
        }) else {
            return false;
        };
        target.rows.remove(position);
        target.unread_from = match target.unread_from {
            Some(from) if from > position => Some(from - 1),
            Some(from) if from < target.rows.len() => Some(from),
            _ => None,
        };
        true
    }

    /// Broadcast a successful response of the app's API traffic.
    pub fn emit_activity(&self) {
        self.emit_response(NetworkResponse::new(SCRIPTED_APP_URL, 200));
    }

    pub fn emit_response(&self, response: NetworkResponse) {
        let _ = lock(&self.state).responses.send(response);
    }

    /// Confirm the displayed verification code on the "other device".
    pub fn confirm_verification(&self) {
        lock(&self.state).authenticated = true;
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        let state = lock(&self.state);
        state.opened && !state.released
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }

    #[must_use]
    pub fn popup_visible(&self) -> bool {
        lock(&self.state).popup_label.is_some()
    }

    #[must_use]
    pub fn submitted(&self) -> bool {
        lock(&self.state).submitted
    }

    /// Username and password typed into the login form.
    #[must_use]
    pub fn typed_credentials(&self) -> (String, String) {
        let state = lock(&self.state);
        (state.email.clone(), state.password.clone())
    }

    /// How many times the notification badges were enumerated.
    #[must_use]
    pub fn notification_scans(&self) -> usize {
        lock(&self.state).notification_scans
    }

    /// Chats activated through their list entry, in order.
    #[must_use]
    pub fn chat_switches(&self) -> Vec<ChatId> {
        lock(&self.state).chat_switches.clone()
    }

    #[must_use]
    pub fn active_chat(&self) -> Option<ChatId> {
        let state = lock(&self.state);
        state.active.map(|chat| state.chats[chat].id.clone())
    }

    fn element(&self, node: Node) -> ScriptedElement {
        ScriptedElement {
            state: Arc::clone(&self.state),
            node,
        }
    }

    fn live(&self) -> Result<MutexGuard<'_, PageState>, SurfaceError> {
        let state = lock(&self.state);
        if state.released {
            return Err(SurfaceError::Closed);
        }
        Ok(state)
    }
}

#[async_trait]
impl PageSurface for ScriptedPage {
    type Element = ScriptedElement;

    async fn open(&self) -> Result<(), SurfaceError> {
        let mut state = self.live()?;
        if state.fail_open {
            return Err(SurfaceError::Unavailable(
                "extension page failed to load".to_string(),
            ));
        }
        state.opened = true;
        Ok(())
    }

    async fn release(&self) -> Result<(), SurfaceError> {
        lock(&self.state).released = true;
        Ok(())
    }

    async fn find(&self, selector: &str) -> Result<Option<ScriptedElement>, SurfaceError> {
        let node = self.live()?.find(selector);
        Ok(node.map(|node| self.element(node)))
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<ScriptedElement>, SurfaceError> {
        let nodes = self.live()?.find_all(selector);
        Ok(nodes.into_iter().map(|node| self.element(node)).collect())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), SurfaceError> {
        let mut state = self.live()?;
        if !state.opened {
            return Err(SurfaceError::NotFound {
                selector: selector.to_string(),
            });
        }
        if selector == state.selectors.email_input {
            state.email.push_str(text);
        } else if selector == state.selectors.password_input {
            state.password.push_str(text);
        } else {
            return Err(SurfaceError::NotFound {
                selector: selector.to_string(),
            });
        }
        Ok(())
    }

    fn responses(&self) -> broadcast::Receiver<NetworkResponse> {
        lock(&self.state).responses.subscribe()
    }
}

/// Element of a [`ScriptedPage`].
#[derive(Debug, Clone)]
pub struct ScriptedElement {
    state: Arc<Mutex<PageState>>,
    node: Node,
}

impl ScriptedElement {
    fn sibling(&self, node: Node) -> Self {
        Self {
            state: Arc::clone(&self.state),
            node,
        }
    }

    fn live(&self) -> Result<MutexGuard<'_, PageState>, SurfaceError> {
        let state = lock(&self.state);
        if state.released {
            return Err(SurfaceError::Closed);
        }
        state.ensure_attached(self.node)?;
        Ok(state)
    }
}

#[async_trait]
impl ElementHandle for ScriptedElement {
    async fn text(&self) -> Result<Option<String>, SurfaceError> {
        let state = self.live()?;
        let text = match self.node {
            Node::PopupButton => state.popup_label.clone(),
            Node::VerificationCode => match &state.login {
                LoginScript::Verification { code } => Some(format!(" {code} ")),
                _ => None,
            },
            Node::RowPart { chat, index, part } => match (state.row(chat, index), part) {
                (Row::Message { sender, .. }, Part::Author) => sender.clone(),
                (Row::Message { time, .. }, Part::Time) => time.clone(),
                (
                    Row::Message {
                        body: Body::Text(text),
                        ..
                    },
                    Part::Text,
                ) => Some(text.clone()),
                _ => None,
            },
            Node::Row { chat, index } => match state.row(chat, index) {
                Row::Notice(text) => Some(text.clone()),
                Row::Message { .. } => None,
            },
            _ => None,
        };
        Ok(text)
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>, SurfaceError> {
        let state = self.live()?;
        let value = match self.node {
            Node::Row { chat, index } if name == state.selectors.message_id_attribute => {
                match state.row(chat, index) {
                    Row::Message { id, .. } => id.clone(),
                    Row::Notice(_) => None,
                }
            }
            Node::ChatEntry { chat } if name == state.selectors.chat_id_attribute => {
                Some(state.chats[chat].id.as_str().to_string())
            }
            _ => None,
        };
        Ok(value)
    }

    async fn matches(&self, selector: &str) -> Result<bool, SurfaceError> {
        let state = self.live()?;
        let s = &state.selectors;
        let matched = match self.node {
            Node::Row { chat, index } => {
                selector == s.message && state.row(chat, index).is_message()
            }
            Node::Unread { .. } => selector == s.unread_messages_notice,
            Node::ChatEntry { .. } => selector == s.chat_entry,
            Node::Badge { .. } => selector == s.notification_icon,
            _ => false,
        };
        Ok(matched)
    }

    async fn query(&self, selector: &str) -> Result<Option<Self>, SurfaceError> {
        let state = self.live()?;
        let s = &state.selectors;
        let found = match self.node {
            Node::Popup if selector == s.popup_button => Some(Node::PopupButton),
            Node::Row { chat, index } => {
                let part = if selector == s.message_author {
                    Some(Part::Author)
                } else if selector == s.message_time {
                    Some(Part::Time)
                } else if selector == s.message_text {
                    Some(Part::Text)
                } else if selector == s.message_image {
                    Some(Part::Image)
                } else {
                    None
                };
                part.filter(|part| match (state.row(chat, index), part) {
                    (Row::Message { sender, .. }, Part::Author) => sender.is_some(),
                    (Row::Message { time, .. }, Part::Time) => time.is_some(),
                    (Row::Message { body, .. }, Part::Text) => matches!(body, Body::Text(_)),
                    (Row::Message { body, .. }, Part::Image) => matches!(body, Body::Image),
                    (Row::Notice(_), _) => false,
                })
                .map(|part| Node::RowPart { chat, index, part })
            }
            _ => None,
        };
        Ok(found.map(|node| self.sibling(node)))
    }

    async fn next_sibling(&self) -> Result<Option<Self>, SurfaceError> {
        let state = self.live()?;
        let chat = match self.node {
            Node::Unread { chat } | Node::Row { chat, .. } => chat,
            _ => return Ok(None),
        };
        let children = state.children(chat);
        let next = children
            .iter()
            .position(|node| *node == self.node)
            .and_then(|position| children.get(position + 1).copied());
        Ok(next.map(|node| self.sibling(node)))
    }

    async fn closest(&self, selector: &str) -> Result<Option<Self>, SurfaceError> {
        let state = self.live()?;
        let found = match self.node {
            Node::Badge { chat } | Node::ChatEntry { chat }
                if selector == state.selectors.chat_entry =>
            {
                Some(Node::ChatEntry { chat })
            }
            _ => None,
        };
        Ok(found.map(|node| self.sibling(node)))
    }

    async fn click(&self) -> Result<(), SurfaceError> {
        let mut state = self.live()?;
        match self.node {
            Node::PopupButton => state.popup_label = None,
            Node::LoginButton => state.submit(),
            Node::ChatEntry { chat } => state.switch_to(chat),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rows_pushed_to_closed_chat_get_marker_and_badge() {
        let page = ScriptedPage::new(LoginScript::Success)
            .signed_in()
            .with_chat("a")
            .with_chat("b")
            .with_open_chat("a");
        page.open().await.unwrap();
        page.push("b", Row::notice("Today"));
        page.push("b", Row::text("1", "Bob", "09:00", "hi"));

        let badges = page
            .find_all(&Selectors::default().notification_icon)
            .await
            .unwrap();
        assert_eq!(badges.len(), 1);

        let entry = badges[0]
            .closest(&Selectors::default().chat_entry)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            entry.attribute("data-chatid").await.unwrap().as_deref(),
            Some("b")
        );

        entry.click().await.unwrap();
        let marker = page
            .find(&Selectors::default().unread_messages_notice)
            .await
            .unwrap()
            .unwrap();
        let first = marker.next_sibling().await.unwrap().unwrap();
        assert!(!first.matches(".MdRGT07Cont").await.unwrap());
        let second = first.next_sibling().await.unwrap().unwrap();
        assert!(second.matches(".MdRGT07Cont").await.unwrap());
        assert!(second.next_sibling().await.unwrap().is_none());
        assert_eq!(page.chat_switches(), vec![ChatId::new("b")]);
    }

    #[tokio::test]
    async fn test_rows_of_other_chat_are_detached() {
        let page = ScriptedPage::new(LoginScript::Success)
            .signed_in()
            .with_chat("a")
            .with_chat("b")
            .with_open_chat("a");
        page.open().await.unwrap();
        page.push("a", Row::text("1", "Al", "09:00", "hi"));
        let row = page
            .find(&Selectors::default().message_by_id("1"))
            .await
            .unwrap()
            .unwrap();

        let entry = page.find_all("[data-chatid].ExSelected").await.unwrap();
        assert_eq!(entry.len(), 1);
        page.push("b", Row::text("2", "Bo", "09:01", "yo"));
        let badge = page.find(".MdIcoBadge01:not(.MdNonDisp)").await.unwrap().unwrap();
        badge.closest("[data-chatid]").await.unwrap().unwrap().click().await.unwrap();

        assert!(matches!(row.text().await, Err(SurfaceError::Detached)));
    }

    #[tokio::test]
    async fn test_released_page_rejects_queries() {
        let page = ScriptedPage::new(LoginScript::Success);
        page.open().await.unwrap();
        page.release().await.unwrap();
        assert!(matches!(
            page.find("#login_wrap_section").await,
            Err(SurfaceError::Closed)
        ));
        assert!(page.is_released());
    }
}
