//! # vk_binding
//!
//! A safe handle-lifetime and extension-command binding layer over the
//! raw Vulkan API.
//!
//! ## Features
//!
//! - **Handle lifetime tracking**: opaque native handles wrapped with
//!   idempotent disposal and children-before-parent teardown ordering
//! - **Allocator binding**: custom host-memory callbacks threaded through
//!   every creation call, pinned for the lifetime of the resources that
//!   reference them
//! - **Callback marshaling**: native debug-report invocations translated
//!   into strongly-typed values with user-data round-trip
//! - **Extension command resolution**: named commands resolved once per
//!   handle scope and memoized, with typed-invocation casting
//!
//! The raw struct and enum definitions come from [`ash`]; this crate is
//! the lifetime and marshaling substrate above them, not a renderer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vk_binding::{Instance, InstanceCreateInfo};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let create_info = InstanceCreateInfo {
//!         enabled_extension_names: vec![
//!             vk_binding::extension_name::EXT_DEBUG_REPORT.to_string(),
//!         ],
//!         ..Default::default()
//!     };
//!     let instance = Instance::new(&create_info, None)?;
//!     for device in instance.enumerate_physical_devices()? {
//!         println!("{}", device.name()?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! All operations block the calling thread until the native call returns;
//! there are no internal threads. Concurrent creation or disposal of the
//! same handle from multiple threads requires external synchronization.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

mod allocator;
mod commands;
mod debug_report;
mod error;
mod handle;
mod instance;
mod physical_device;

pub use allocator::{AllocationHooks, Allocator};
pub use debug_report::{
    all_report_flags, DebugReportCallback, DebugReportCallbackCreateInfo,
    DebugReportCallbackData, DebugReportHandler,
};
pub use error::{BindingError, BindingResult};
pub use handle::{Disposable, Handle};
pub use instance::{
    enumerate_instance_extension_properties, enumerate_instance_layer_properties, extension_name,
    layer_name, ApplicationInfo, ExtensionProperties, Instance, InstanceCreateInfo,
    LayerProperties,
};
pub use physical_device::PhysicalDevice;

// Re-export the raw binding types the public surface speaks in.
pub use ash::vk;
