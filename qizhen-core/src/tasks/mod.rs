pub mod answer;
pub mod dialogue;
pub mod knowledge_graph;
pub mod question;
pub mod types;

pub use answer::{GenerateAnswerTask, RetrieveAnswerContextTask};
pub use dialogue::{ResolveDialogueIntentTask, RetrieveDialogueContextTask, SocraticReplyTask};
pub use knowledge_graph::{ExtractGraphTopicTask, GenerateMindmapTask, RetrieveGraphContextTask};
pub use question::{
    GenerateQuestionsTask, ParseQuestionRequestTask, RetrieveQuestionContextTask, RevealAnswersTask,
};
