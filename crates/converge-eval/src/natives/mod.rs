mod classes;
mod lists;
mod strings;
mod system;

use crate::functions::FunctionRegistry;

pub fn register_all(registry: &mut FunctionRegistry) {
    classes::register(registry);
    lists::register(registry);
    strings::register(registry);
    system::register(registry);
}
