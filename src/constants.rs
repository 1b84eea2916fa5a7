//! Collection and selector constants shared by the worker and the read API.

// Canonical collections
pub const SUBJECTS_COLLECTION: &str = "subjects";
pub const COURSES_COLLECTION: &str = "courses";

/// Suffix appended to a canonical collection name to form its staging area.
pub const STAGING_SUFFIX: &str = "_staging";

// Catalog page locations
pub const DEFAULT_CATALOG_URL: &str =
    "https://studentservices.uwo.ca/secure/timetables/mastertt/ttindex.cfm";
pub const DEFAULT_FORM_SELECTOR: &str = "#searchForm";
pub const DEFAULT_HEADER_SELECTOR: &str = ".page-header h1 small";
pub const DEFAULT_RESULTS_SELECTOR: &str = ".span12";

// Search form submission
pub const SUBJECT_FIELD: &str = "subject";
pub const COMMAND_FIELD: &str = "command";
pub const SEARCH_COMMAND: &str = "search";

/// Length of the year suffix that ends every catalog header ("2020/2021").
pub const YEAR_SUFFIX_LEN: usize = 9;

/// Literal placeholder the catalog uses for an unscheduled day cell.
pub const BLANK_DAY_MARKER: &str = "&nbsp;";

/// Default (collection, selector) pairs refreshed on every run, in order.
pub const DEFAULT_OPTION_TARGETS: [(&str, &str); 7] = [
    (SUBJECTS_COLLECTION, "#inputSubject"),
    ("suffixes", "#inputDesignation"),
    ("course_types", "#inputCourseType"),
    ("components", "#inputComponent"),
    ("campuses", "#inputCampus"),
    ("start_times", "[name=time]"),
    ("end_times", "[name=end_time]"),
];

/// Staging collection name for a canonical collection.
pub fn staging_name(collection: &str) -> String {
    format!("{collection}{STAGING_SUFFIX}")
}
