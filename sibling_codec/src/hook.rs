use crate::de::Deserializer;
use crate::error::Result;
use crate::ser::Serializer;
use crate::value::Value;

/// Custom encoding for values the generic format cannot express.
///
/// Hooks are consulted in order before any composite value is encoded; the
/// first one whose [`matches`](HostObjectHook::matches) returns true writes the
/// value instead. On decode the hook is selected by the [`tag`](HostObjectHook::tag)
/// written after the host-object marker, and must read back exactly the
/// sub-values its `write` produced, in the same order.
pub trait HostObjectHook: Send + Sync {
    fn tag(&self) -> &'static str;

    fn matches(&self, value: &Value) -> bool;

    fn write(&self, value: &Value, serializer: &mut Serializer<'_>) -> Result<()>;

    fn read(&self, deserializer: &mut Deserializer<'_>) -> Result<Value>;
}
