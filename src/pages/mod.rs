mod page;

pub use page::{
    Address, DEFAULT_PAGE_SIZE, FreshPage, PageChunk, PageClass, PageEntry, PageSpan, page_align,
};
