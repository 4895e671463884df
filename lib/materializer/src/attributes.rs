use crate::settings::{InputBuffer, SettingsError};
use crate::supervision::SupervisionDecider;

/// A single stage-local override or marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Name(String),
    InputBuffer(InputBuffer),
    SupervisionStrategy(SupervisionDecider),
    Dispatcher(String),
    /// The stage must not be fused with the stages before it.
    AsyncBoundary,
}

/// Ordered attribute list. Entries added later are more specific and win lookups.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attributes {
    attributes: Vec<Attribute>,
}

impl Attributes {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::none().with(Attribute::Name(name.into()))
    }

    pub fn input_buffer(initial: usize, max: usize) -> Result<Self, SettingsError> {
        Ok(Self::none().with(Attribute::InputBuffer(InputBuffer::new(initial, max)?)))
    }

    pub fn supervision_strategy(decider: SupervisionDecider) -> Self {
        Self::none().with(Attribute::SupervisionStrategy(decider))
    }

    pub fn dispatcher(name: impl Into<String>) -> Self {
        Self::none().with(Attribute::Dispatcher(name.into()))
    }

    pub fn async_boundary() -> Self {
        Self::none().with(Attribute::AsyncBoundary)
    }

    pub fn with(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// `self` followed by `other`, so `other`'s entries take precedence.
    pub fn and(&self, other: &Attributes) -> Self {
        let mut attributes = self.attributes.clone();
        attributes.extend(other.attributes.iter().cloned());
        Self { attributes }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn get_name(&self) -> Option<&str> {
        self.attributes.iter().rev().find_map(|attribute| match attribute {
            Attribute::Name(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn get_input_buffer(&self) -> Option<InputBuffer> {
        self.attributes.iter().rev().find_map(|attribute| match attribute {
            Attribute::InputBuffer(input_buffer) => Some(*input_buffer),
            _ => None,
        })
    }

    pub fn get_supervision_decider(&self) -> Option<&SupervisionDecider> {
        self.attributes.iter().rev().find_map(|attribute| match attribute {
            Attribute::SupervisionStrategy(decider) => Some(decider),
            _ => None,
        })
    }

    pub fn get_dispatcher(&self) -> Option<&str> {
        self.attributes.iter().rev().find_map(|attribute| match attribute {
            Attribute::Dispatcher(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn is_async_boundary(&self) -> bool {
        self.attributes
            .iter()
            .any(|attribute| matches!(attribute, Attribute::AsyncBoundary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_entry_of_a_kind_wins() {
        let attributes = Attributes::named("outer")
            .and(&Attributes::dispatcher("a"))
            .and(&Attributes::named("inner"))
            .and(&Attributes::dispatcher("b"));
        assert_eq!(attributes.get_name(), Some("inner"));
        assert_eq!(attributes.get_dispatcher(), Some("b"));
        assert_eq!(attributes.get_input_buffer(), None);
        assert!(!attributes.is_async_boundary());
        assert_eq!(attributes.iter().count(), 4);
    }

    #[test]
    fn invalid_input_buffer_attribute_is_rejected() {
        assert!(Attributes::input_buffer(4, 2).is_err());
        let attributes = Attributes::input_buffer(2, 4).unwrap();
        let buffer = attributes.get_input_buffer().unwrap();
        assert_eq!((buffer.initial(), buffer.max()), (2, 4));
    }

    #[test]
    fn async_boundary_marker() {
        let attributes = Attributes::named("map").and(&Attributes::async_boundary());
        assert!(attributes.is_async_boundary());
        assert!(Attributes::none().is_empty());
    }
}
