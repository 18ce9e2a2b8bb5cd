use super::{Attributes, NotifiableParser, XmlHandler};

/// Error reported by the server inside an otherwise successful response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFault {
    pub code: u32,
    pub message: String,
}

/// Detects `<error errorCode="…">` documents.
///
/// Older servers send `<error code="…">message</error>`, newer ones wrap the
/// message in `<errorMessage>`; both are accepted.
pub struct ErrorParser {
    base: NotifiableParser,
    in_error: bool,
    fault: Option<ServerFault>,
}

impl Default for ErrorParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorParser {
    pub fn new() -> Self {
        Self {
            base: NotifiableParser::new(None),
            in_error: false,
            fault: None,
        }
    }

    pub fn into_fault(self) -> Option<ServerFault> {
        self.fault
    }
}

impl XmlHandler for ErrorParser {
    fn start_element(&mut self, name: &str, attributes: &Attributes) {
        self.base.reset_buffer();
        if name == "error" && self.fault.is_none() {
            let code = attributes
                .get("errorCode")
                .or_else(|| attributes.get("code"))
                .and_then(|code| code.trim().parse().ok())
                .unwrap_or_default();
            self.in_error = true;
            self.fault = Some(ServerFault {
                code,
                message: String::new(),
            });
        }
    }

    fn end_element(&mut self, name: &str) {
        if self.in_error {
            let text = self.base.buffer().trim();
            if let Some(fault) = self.fault.as_mut() {
                let is_message = name == "errorMessage"
                    || (name == "error" && fault.message.is_empty());
                if is_message && !text.is_empty() {
                    fault.message = text.to_string();
                }
            }
            if name == "error" {
                self.in_error = false;
            }
        }
        self.base.reset_buffer();
    }

    fn characters(&mut self, text: &str) {
        self.base.push(text);
    }
}
