pub mod health_dto;
pub mod query_dto;
