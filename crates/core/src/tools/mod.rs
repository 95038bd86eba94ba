//! Input tools: placement tools, signature pad, photo capture and text editing

pub mod photo;
pub mod signature;
pub mod text_edit;

use crate::annotation::{Color, PropertyValue, TextStyle};

/// Tool armed in the toolbar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tool {
    #[default]
    None,
    /// Tap to place a text box
    Text,
    /// Tap to place a checkmark
    Stamp,
}

impl Tool {
    pub fn label(self) -> &'static str {
        match self {
            Tool::None => "none",
            Tool::Text => "text",
            Tool::Stamp => "stamp",
        }
    }
}

/// One change from the text toolbar.
#[derive(Debug, Clone, PartialEq)]
pub enum TextSetting {
    FontFamily(String),
    FontSize(f32),
    Color(Color),
    Bold(bool),
    Italic(bool),
}

impl TextSetting {
    pub fn to_property(&self) -> PropertyValue {
        match self {
            TextSetting::FontFamily(family) => PropertyValue::FontFamily(family.clone()),
            TextSetting::FontSize(size) => PropertyValue::FontSize(*size),
            TextSetting::Color(color) => PropertyValue::Color(*color),
            TextSetting::Bold(bold) => PropertyValue::Bold(*bold),
            TextSetting::Italic(italic) => PropertyValue::Italic(*italic),
        }
    }

    pub fn apply_to(&self, style: &mut TextStyle) {
        match self {
            TextSetting::FontFamily(family) => style.font_family = family.clone(),
            TextSetting::FontSize(size) => style.font_size = *size,
            TextSetting::Color(color) => style.color = *color,
            TextSetting::Bold(bold) => style.bold = *bold,
            TextSetting::Italic(italic) => style.italic = *italic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_updates_defaults() {
        let mut style = TextStyle::default();
        TextSetting::Bold(true).apply_to(&mut style);
        TextSetting::FontSize(22.0).apply_to(&mut style);

        assert!(style.bold);
        assert_eq!(style.font_size, 22.0);
        let property = TextSetting::Color(Color::BLUE).to_property();
        assert_eq!(property, PropertyValue::Color(Color::BLUE));
    }
}
