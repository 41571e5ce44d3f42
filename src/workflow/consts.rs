/// Source handle of the edges taken when an if-statement passes.
pub const BRANCH_TRUE: &str = "output-true";
/// Source handle of the edges taken when an if-statement fails.
pub const BRANCH_FALSE: &str = "output-false";

pub const IF_STATEMENT_RESULT: &str = "result";

pub const FOR_EACH_ITEMS: &str = "items";
pub const FOR_EACH_COUNT: &str = "count";
pub const FOR_EACH_CURRENT_VALUE: &str = "currentValue";
pub const FOR_EACH_CURRENT_INDEX: &str = "currentIndex";
pub const FOR_EACH_OUTPUT_PATH: &str = "outputPath";

pub const RESULTS: &str = "results";
pub const SUCCESS_COUNT: &str = "successCount";
pub const FAIL_COUNT: &str = "failCount";

pub const ARGUMENTS_AS_STR: &str = "as_str";
pub const ARGUMENTS_AS_ARRAY: &str = "as_array";

pub const CONTEXT_TRAJECTORY_DUMPS: &str = "trajectory_dumps";

pub const SCHEMA_DEFINITION: &str = "definition";
