pub mod flipbook_service;
