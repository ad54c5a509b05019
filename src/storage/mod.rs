pub mod btree;
pub mod page;
pub mod pager;
