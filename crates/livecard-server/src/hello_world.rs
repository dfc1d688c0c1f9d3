//! The Hello World card.
//!
//! Static form: a large "Hello World" title and an activation label.
//! While live it grows a text input plus three labels that echo what the
//! user does: hovering the title, focusing the input, and typing into it.

use crate::session::CardBehavior;
use livecard_core::{
    Card, DocumentError, Element, EventContext, EventPayload, HandlerError, Hook, LiveDocument,
    TextSize, TextWeight,
};
use tracing::debug;

pub const CARD_ID: &str = "HelloWorld";
pub const TITLE: &str = "Title";
pub const ACTIVATION: &str = "Activation";
pub const INPUT: &str = "Input";
pub const FOCUS_LABEL: &str = "FocusLabel";
pub const TEXT_LABEL: &str = "TextLabel";
pub const HOVER: &str = "Hover";

const TITLE_TEXT: &str = "Hello World";
const NO_MOUSE: &str = "No mouse";

/// Elements that only exist while the card is live.
const LIVE_ONLY: [&str; 4] = [INPUT, FOCUS_LABEL, TEXT_LABEL, HOVER];

/// The card in its deactivated form.
pub fn static_card() -> Result<Card, DocumentError> {
    let mut card = Card::new(CARD_ID)?;
    let mut title = Element::text_block(TITLE, TITLE_TEXT);
    title.set_size(TextSize::Large)?;
    card.push(title)?;
    card.push(Element::text_block(ACTIVATION, "Deactivated"))?;
    Ok(card)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HelloWorld;

impl CardBehavior for HelloWorld {
    fn initial_card(&self) -> Result<Card, DocumentError> {
        static_card()
    }

    fn activate(&self, document: &mut LiveDocument) -> Result<(), HandlerError> {
        let card = document.card_mut();
        card.set_property(ACTIVATION, "text", "Activated")?;

        document.register_handler(TITLE, Hook::Click, toggle_title_weight)?;
        document.register_handler(TITLE, Hook::MouseEnter, show_hover)?;
        document.register_handler(TITLE, Hook::MouseLeave, show_hover)?;

        document
            .card_mut()
            .push(Element::text_input(INPUT, "Enter some stuff"))?;
        document.register_handler(INPUT, Hook::Focus, |context, _| {
            set_label(context, FOCUS_LABEL, "Input has focus")
        })?;
        document.register_handler(INPUT, Hook::Blur, |context, _| {
            set_label(context, FOCUS_LABEL, "input does not have focus")
        })?;
        document.register_handler(INPUT, Hook::TextChanged, echo_text)?;

        let card = document.card_mut();
        card.push(Element::text_block(FOCUS_LABEL, "Focus"))?;
        card.push(Element::text_block(TEXT_LABEL, "Text"))?;
        card.push(Element::text_block(HOVER, NO_MOUSE))?;
        debug!("Hello World activated");
        Ok(())
    }

    fn deactivate(&self, document: &mut LiveDocument) -> Result<Card, HandlerError> {
        for id in LIVE_ONLY {
            if document.card().contains(id) {
                document.remove_element(id)?;
            }
        }
        document.clear_handlers();

        let card = document.card_mut();
        if let Some(title) = card.find_by_id_mut(TITLE) {
            title.set_text(TITLE_TEXT)?;
            title.remove_property("weight");
        }
        card.set_property(ACTIVATION, "text", "Deactivated")?;
        debug!("Hello World deactivated");
        Ok(card.clone())
    }
}

fn toggle_title_weight(
    context: &mut EventContext<'_>,
    _: &EventPayload,
) -> Result<(), HandlerError> {
    let title = context.target()?;
    let next = match title.weight() {
        TextWeight::Default => TextWeight::Bolder,
        _ => TextWeight::Default,
    };
    title.set_weight(next)?;
    Ok(())
}

fn show_hover(context: &mut EventContext<'_>, _: &EventPayload) -> Result<(), HandlerError> {
    let text = match context.hook() {
        Hook::MouseEnter => "Mouse Mouse Mouse",
        _ => NO_MOUSE,
    };
    set_label(context, HOVER, text)
}

fn echo_text(context: &mut EventContext<'_>, payload: &EventPayload) -> Result<(), HandlerError> {
    let text = payload.text().unwrap_or_default();
    set_label(context, TEXT_LABEL, &format!("Input.Text={text}"))
}

/// Labels may be missing if a snapshot dropped them; that is not an error.
fn set_label(context: &mut EventContext<'_>, id: &str, text: &str) -> Result<(), HandlerError> {
    if let Some(label) = context.element_mut(id) {
        label.set_text(text)?;
    }
    Ok(())
}
