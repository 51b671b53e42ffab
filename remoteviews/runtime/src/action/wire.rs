//! Actions travel as `(tag, view_id, payload)` tuples so the variant is
//! identified by its fixed small-integer tag in every wire form.

use std::fmt;

use serde::de::{self, DeserializeOwned, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Action, ActionKind, tags};
use crate::error::ValidationError;

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.tag())?;
        tuple.serialize_element(&self.view_id)?;
        match &self.kind {
            ActionKind::ClickResponse(a) | ActionKind::CheckedChangeResponse(a) => {
                tuple.serialize_element(a)?
            }
            ActionKind::Reflection(a) => tuple.serialize_element(a)?,
            ActionKind::DrawableTint(a) => tuple.serialize_element(a)?,
            ActionKind::AddView(a) => tuple.serialize_element(a)?,
            ActionKind::ContentNavigation(a) => tuple.serialize_element(a)?,
            ActionKind::EmptyView(a) => tuple.serialize_element(a)?,
            ActionKind::RemoveViews(a) => tuple.serialize_element(a)?,
            ActionKind::PendingIntentTemplate(a) => tuple.serialize_element(a)?,
            ActionKind::LegacyAdapterIntent(a) => tuple.serialize_element(a)?,
            ActionKind::CompoundDrawables(a) => tuple.serialize_element(a)?,
            ActionKind::BitmapReflection(a) => tuple.serialize_element(a)?,
            ActionKind::TextSize(a) => tuple.serialize_element(a)?,
            ActionKind::Padding(a) => tuple.serialize_element(a)?,
            ActionKind::LayoutParam(a) => tuple.serialize_element(a)?,
            ActionKind::RippleColor(a) => tuple.serialize_element(a)?,
            ActionKind::IntTag(a) => tuple.serialize_element(a)?,
            ActionKind::RemoveFromParent => tuple.serialize_element(&())?,
            ActionKind::ResourceReflection(a) => tuple.serialize_element(a)?,
            ActionKind::DimensionReflection(a) => tuple.serialize_element(a)?,
            ActionKind::NightModeReflection(a) => tuple.serialize_element(a)?,
            ActionKind::CollectionItems(a) => tuple.serialize_element(a)?,
            ActionKind::AttributeReflection(a) => tuple.serialize_element(a)?,
            ActionKind::CompoundButtonChecked(a) => tuple.serialize_element(a)?,
            ActionKind::RadioGroupChecked(a) => tuple.serialize_element(a)?,
            ActionKind::OutlineRadius(a) => tuple.serialize_element(a)?,
        }
        tuple.end()
    }
}

struct ActionVisitor;

fn payload<'de, A, T>(seq: &mut A) -> Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: DeserializeOwned,
{
    seq.next_element()?
        .ok_or_else(|| de::Error::invalid_length(2, &"an action payload"))
}

impl<'de> Visitor<'de> for ActionVisitor {
    type Value = Action;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an action tuple (tag, view id, payload)")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Action, A::Error> {
        let tag: u8 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let view_id: i32 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        let s = &mut seq;

        let kind = match tag {
            tags::CLICK_RESPONSE => ActionKind::ClickResponse(payload(s)?),
            tags::REFLECTION => ActionKind::Reflection(payload(s)?),
            tags::DRAWABLE_TINT => ActionKind::DrawableTint(payload(s)?),
            tags::VIEW_GROUP_ADD => ActionKind::AddView(payload(s)?),
            tags::CONTENT_NAVIGATION => ActionKind::ContentNavigation(payload(s)?),
            tags::EMPTY_VIEW => ActionKind::EmptyView(payload(s)?),
            tags::VIEW_GROUP_REMOVE => ActionKind::RemoveViews(payload(s)?),
            tags::PENDING_INTENT_TEMPLATE => ActionKind::PendingIntentTemplate(payload(s)?),
            tags::LEGACY_ADAPTER_INTENT => ActionKind::LegacyAdapterIntent(payload(s)?),
            tags::COMPOUND_DRAWABLES => ActionKind::CompoundDrawables(payload(s)?),
            tags::BITMAP_REFLECTION => ActionKind::BitmapReflection(payload(s)?),
            tags::TEXT_SIZE => ActionKind::TextSize(payload(s)?),
            tags::PADDING => ActionKind::Padding(payload(s)?),
            tags::LAYOUT_PARAM => ActionKind::LayoutParam(payload(s)?),
            tags::RIPPLE_COLOR => ActionKind::RippleColor(payload(s)?),
            tags::INT_TAG => ActionKind::IntTag(payload(s)?),
            tags::REMOVE_FROM_PARENT => {
                payload::<_, ()>(s)?;
                ActionKind::RemoveFromParent
            }
            tags::RESOURCE_REFLECTION => ActionKind::ResourceReflection(payload(s)?),
            tags::COMPLEX_UNIT_DIMENSION_REFLECTION => ActionKind::DimensionReflection(payload(s)?),
            tags::NIGHT_MODE_REFLECTION => ActionKind::NightModeReflection(payload(s)?),
            tags::COLLECTION_ITEMS => ActionKind::CollectionItems(payload(s)?),
            tags::ATTRIBUTE_REFLECTION => ActionKind::AttributeReflection(payload(s)?),
            tags::COMPOUND_BUTTON_CHECKED => ActionKind::CompoundButtonChecked(payload(s)?),
            tags::RADIO_GROUP_CHECKED => ActionKind::RadioGroupChecked(payload(s)?),
            tags::OUTLINE_RADIUS => ActionKind::OutlineRadius(payload(s)?),
            tags::CHECKED_CHANGE_RESPONSE => ActionKind::CheckedChangeResponse(payload(s)?),
            unknown => return Err(de::Error::custom(ValidationError::UnknownActionTag(unknown))),
        };

        Ok(Action { view_id, kind })
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_tuple(3, ActionVisitor)
    }
}
