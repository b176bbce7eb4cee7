// Links every feature module so its `register_module!` submission reaches
// the inventory. Add a line here when a module crate is added to the workspace.
#![allow(unused_imports)]

use habit as _;
use subscription as _;
use user as _;

/// Ids of the modules linked into this binary.
pub fn linked_modules() -> [&'static str; 3] {
    [user::MODULE_ID, subscription::MODULE_ID, habit::MODULE_ID]
}
