//! ClassStore contract suite entry point for the in-memory adapter.
//!
//! New scenarios added to `class_store_contract_tests!` run here automatically.

use classbook_testing::contract::class_store_contract_tests;

class_store_contract_tests! {
    suite = in_memory,
    make_store = classbook_memory::InMemoryClassStore::new,
}
