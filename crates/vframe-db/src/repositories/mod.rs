mod job_repo;
mod user_repo;

pub use job_repo::PgJobRepository;
pub use user_repo::PgUserRepository;
