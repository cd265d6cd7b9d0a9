pub mod db;
pub mod lesson_stream;
pub mod outline_llm;

pub use db::DbAdapter;
pub use lesson_stream::HttpLessonAdapter;
pub use outline_llm::OpenAiOutlineAdapter;
