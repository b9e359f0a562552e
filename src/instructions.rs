//! System instruction for a new backend session

use crate::directory::Subject;

/// Produces the system instruction a session starts with.
pub trait InstructionProvider: Send + Sync + 'static {
    fn instructions_for(&self, subject: &Subject) -> String;
}

/// Fills `{name}` in a fixed template.
#[derive(Debug, Clone)]
pub struct TemplateInstructions {
    template: String,
}

impl TemplateInstructions {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl InstructionProvider for TemplateInstructions {
    fn instructions_for(&self, subject: &Subject) -> String {
        self.template.replace("{name}", &subject.name)
    }
}
