use poise::serenity_prelude::{ButtonStyle, CreateActionRow, CreateButton};

use super::controls::ControlAction;

pub const PANEL_PREFIX: &str = "tempvoice:";
pub const RENAME_FORM_ID: &str = "tempvoice:rename_form";
pub const LIMIT_FORM_ID: &str = "tempvoice:limit_form";

#[derive(Debug, poise::Modal)]
#[name = "Rename your channel"]
pub struct RenameForm {
    #[name = "New channel name"]
    #[placeholder = "Study room"]
    #[min_length = 1]
    #[max_length = 100]
    pub name: String,
}

#[derive(Debug, poise::Modal)]
#[name = "Set a user limit"]
pub struct LimitForm {
    #[name = "User limit (0 removes the limit, max 99)"]
    #[placeholder = "5"]
    #[min_length = 1]
    #[max_length = 3]
    pub limit: String,
}

impl LimitForm {
    /// Anything that is not a whole number is reported as out of range.
    pub fn action(&self) -> ControlAction {
        ControlAction::SetLimit(self.limit.trim().parse().unwrap_or(-1))
    }
}

/// A button on the control panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelButton {
    Lock,
    Unlock,
    Hide,
    Show,
    Rename,
    Limit,
}

impl PanelButton {
    const ALL: [PanelButton; 6] = [
        Self::Lock,
        Self::Unlock,
        Self::Hide,
        Self::Show,
        Self::Rename,
        Self::Limit,
    ];

    fn key(self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Hide => "hide",
            Self::Show => "show",
            Self::Rename => "rename",
            Self::Limit => "limit",
        }
    }

    pub fn custom_id(self) -> String {
        format!("{}{}", PANEL_PREFIX, self.key())
    }

    pub fn from_custom_id(id: &str) -> Option<Self> {
        let key = id.strip_prefix(PANEL_PREFIX)?;
        Self::ALL.into_iter().find(|b| b.key() == key)
    }

    /// The action to run directly, or `None` for buttons that open a form.
    pub fn action(self) -> Option<ControlAction> {
        match self {
            Self::Lock => Some(ControlAction::Lock),
            Self::Unlock => Some(ControlAction::Unlock),
            Self::Hide => Some(ControlAction::Hide),
            Self::Show => Some(ControlAction::Show),
            Self::Rename | Self::Limit => None,
        }
    }

    fn button(self) -> CreateButton {
        let (label, emoji) = match self {
            Self::Lock => ("Lock", '🔒'),
            Self::Unlock => ("Unlock", '🔓'),
            Self::Hide => ("Hide", '🙈'),
            Self::Show => ("Show", '👀'),
            Self::Rename => ("Rename", '✏'),
            Self::Limit => ("Limit", '👥'),
        };
        CreateButton::new(self.custom_id())
            .label(label)
            .emoji(emoji)
            .style(ButtonStyle::Secondary)
    }
}

pub fn panel_components() -> Vec<CreateActionRow> {
    PanelButton::ALL
        .chunks(3)
        .map(|row| CreateActionRow::Buttons(row.iter().map(|b| b.button()).collect()))
        .collect()
}
