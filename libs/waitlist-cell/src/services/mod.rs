pub mod registry;

pub use registry::WaitlistRegistryService;
