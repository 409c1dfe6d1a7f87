mod common;

mod crawl_tests;
mod download_tests;
mod proxy_source_tests;
mod robots_tests;
mod tor_control_tests;
