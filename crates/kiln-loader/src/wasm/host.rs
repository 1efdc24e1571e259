//! `kiln:api` host functions.
//!
//! | Function | Inputs | Output |
//! |----------|--------|--------|
//! | `kiln_log` | level, message | - |
//! | `kiln_config_get` | dotted key | JSON value or empty |
//! | `kiln_storage_get` | key | value or empty |
//! | `kiln_storage_set` | key, value | - |
//! | `kiln_command_register` | name, permission | - |
//! | `kiln_event_subscribe` | topic | subscription id |
//! | `kiln_event_unsubscribe` | subscription id | - |
//!
//! Everything a module acquires through these functions is tracked by its
//! [`ModuleContext`] and released when the context closes.

use std::sync::Arc;

use extism::{CurrentPlugin, Error, PTR, PluginBuilder, UserData, Val};
use kiln_context::{ModuleContext, SubscriptionId};

use crate::surface::KILN_API_NAMESPACE;

/// State shared by every host function of one module instance.
pub struct HostState {
    /// Context of the module the plugin belongs to.
    pub ctx: Arc<ModuleContext>,
}

type HostFn = fn(&mut CurrentPlugin, &[Val], &mut [Val], UserData<HostState>) -> Result<(), Error>;

/// The capability functions exposed in `kiln:api`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFunction {
    /// Write to the module's log.
    Log,
    /// Read a configuration value.
    ConfigGet,
    /// Read from module storage.
    StorageGet,
    /// Write to module storage.
    StorageSet,
    /// Register a declared command.
    CommandRegister,
    /// Subscribe to an event topic.
    EventSubscribe,
    /// Drop a subscription.
    EventUnsubscribe,
}

impl HostFunction {
    /// Every function, in registration order.
    pub const ALL: [Self; 7] = [
        Self::Log,
        Self::ConfigGet,
        Self::StorageGet,
        Self::StorageSet,
        Self::CommandRegister,
        Self::EventSubscribe,
        Self::EventUnsubscribe,
    ];

    /// Import name inside `kiln:api`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Log => "kiln_log",
            Self::ConfigGet => "kiln_config_get",
            Self::StorageGet => "kiln_storage_get",
            Self::StorageSet => "kiln_storage_set",
            Self::CommandRegister => "kiln_command_register",
            Self::EventSubscribe => "kiln_event_subscribe",
            Self::EventUnsubscribe => "kiln_event_unsubscribe",
        }
    }

    /// Number of pointer arguments.
    #[must_use]
    pub fn arg_count(self) -> usize {
        match self {
            Self::Log | Self::StorageSet | Self::CommandRegister => 2,
            Self::ConfigGet | Self::StorageGet | Self::EventSubscribe | Self::EventUnsubscribe => 1,
        }
    }

    /// Whether the function returns a pointer to a string.
    #[must_use]
    pub fn returns_ptr(self) -> bool {
        matches!(self, Self::ConfigGet | Self::StorageGet | Self::EventSubscribe)
    }

    fn handler(self) -> HostFn {
        match self {
            Self::Log => kiln_log_impl,
            Self::ConfigGet => kiln_config_get_impl,
            Self::StorageGet => kiln_storage_get_impl,
            Self::StorageSet => kiln_storage_set_impl,
            Self::CommandRegister => kiln_command_register_impl,
            Self::EventSubscribe => kiln_event_subscribe_impl,
            Self::EventUnsubscribe => kiln_event_unsubscribe_impl,
        }
    }
}

/// Register every [`HostFunction`] in the `kiln:api` namespace.
pub fn register_host_functions(builder: PluginBuilder, user_data: UserData<HostState>) -> PluginBuilder {
    HostFunction::ALL.iter().fold(builder, |builder, f| {
        let returns = if f.returns_ptr() { vec![PTR] } else { Vec::new() };
        builder.with_function_in_namespace(
            KILN_API_NAMESPACE,
            f.name(),
            vec![PTR; f.arg_count()],
            returns,
            user_data.clone(),
            f.handler(),
        )
    })
}

fn context(user_data: &UserData<HostState>) -> Result<Arc<ModuleContext>, Error> {
    let ud = user_data.get()?;
    let state = ud
        .lock()
        .map_err(|e| Error::msg(format!("host state lock poisoned: {e}")))?;
    Ok(Arc::clone(&state.ctx))
}

fn write_output(plugin: &mut CurrentPlugin, outputs: &mut [Val], value: &str) -> Result<(), Error> {
    let mem = plugin.memory_new(value)?;
    outputs[0] = plugin.memory_to_val(mem);
    Ok(())
}

#[allow(clippy::needless_pass_by_value)] // Signature required by Extism callback API
fn kiln_log_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let level: String = plugin.memory_get_val(&inputs[0])?;
    let message: String = plugin.memory_get_val(&inputs[1])?;
    context(&user_data)?.logger().log(&level, &message);
    Ok(())
}

#[allow(clippy::needless_pass_by_value)] // Signature required by Extism callback API
fn kiln_config_get_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let key: String = plugin.memory_get_val(&inputs[0])?;
    let ctx = context(&user_data)?;
    let result = match ctx.config_value(&key) {
        Some(v) => serde_json::to_string(v)
            .map_err(|e| Error::msg(format!("config value {key} is not representable: {e}")))?,
        None => String::new(),
    };
    write_output(plugin, outputs, &result)
}

#[allow(clippy::needless_pass_by_value)] // Signature required by Extism callback API
fn kiln_storage_get_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let key: String = plugin.memory_get_val(&inputs[0])?;
    let value = context(&user_data)?.storage().get(&key).unwrap_or_default();
    write_output(plugin, outputs, &value)
}

#[allow(clippy::needless_pass_by_value)] // Signature required by Extism callback API
fn kiln_storage_set_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let key: String = plugin.memory_get_val(&inputs[0])?;
    let value: String = plugin.memory_get_val(&inputs[1])?;
    context(&user_data)?.storage().set(&key, value);
    Ok(())
}

#[allow(clippy::needless_pass_by_value)] // Signature required by Extism callback API
fn kiln_command_register_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let name: String = plugin.memory_get_val(&inputs[0])?;
    let permission: String = plugin.memory_get_val(&inputs[1])?;
    let permission = Some(permission.trim()).filter(|p| !p.is_empty());
    context(&user_data)?
        .register_command(&name, permission)
        .map_err(|e| Error::msg(e.to_string()))?;
    Ok(())
}

#[allow(clippy::needless_pass_by_value)] // Signature required by Extism callback API
fn kiln_event_subscribe_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let topic: String = plugin.memory_get_val(&inputs[0])?;
    let id = context(&user_data)?
        .subscribe(&topic)
        .map_err(|e| Error::msg(e.to_string()))?;
    write_output(plugin, outputs, &id.get().to_string())
}

#[allow(clippy::needless_pass_by_value)] // Signature required by Extism callback API
fn kiln_event_unsubscribe_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let raw: String = plugin.memory_get_val(&inputs[0])?;
    let id: u64 = raw
        .trim()
        .parse()
        .map_err(|e| Error::msg(format!("invalid subscription id {raw:?}: {e}")))?;
    context(&user_data)?.unsubscribe(SubscriptionId::new(id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_prefixed() {
        let mut names: Vec<_> = HostFunction::ALL.iter().map(|f| f.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), HostFunction::ALL.len());
        assert!(names.iter().all(|n| n.starts_with("kiln_")));
    }

    #[test]
    fn signatures() {
        assert_eq!(HostFunction::Log.arg_count(), 2);
        assert!(!HostFunction::Log.returns_ptr());
        assert_eq!(HostFunction::EventSubscribe.arg_count(), 1);
        assert!(HostFunction::EventSubscribe.returns_ptr());
    }
}
