use std::sync::Arc;

use tracing::{info, instrument};

use crate::auth::Identity;
use crate::error::AppError;
use crate::models::{MARKS_COLLECTION, MarksEntry, MarksFields, MarksRecord};
use crate::store::{Filter, RecordStore, to_body};

/// CRUD and lookups over the `studentMarks` collection. Holds no state
/// between calls; every call is a fresh round trip to the store.
///
/// Writes do not check `marks <= max_marks`, the period against the known
/// set, or the shape of the email. Those checks live at the request
/// boundary only.
#[derive(Clone)]
pub struct MarksRepository {
    store: Arc<dyn RecordStore>,
}

impl MarksRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, entry), fields(student = %entry.student_name, period = %entry.period))]
    pub async fn create(&self, entry: MarksEntry, teacher_id: &str) -> Result<MarksRecord, AppError> {
        info!("Adding marks");
        let fields = MarksFields::from_entry(entry, Some(teacher_id.to_string()));

        let document = self
            .store
            .insert(MARKS_COLLECTION, to_body(&fields)?)
            .await
            .inspect_err(|e| e.log_and_record("Add marks"))?;

        MarksRecord::try_from(document)
    }

    /// Branch and section are upper-cased before matching, so lookups are
    /// case-insensitive at the input.
    #[instrument(skip(self))]
    pub async fn find_by_branch_section(
        &self,
        branch: &str,
        section: &str,
    ) -> Result<Vec<MarksRecord>, AppError> {
        self.find(
            &[
                Filter::eq("branch", branch.to_uppercase()),
                Filter::eq("section", section.to_uppercase()),
            ],
            "Get filtered marks",
        )
        .await
    }

    /// Exact, case-sensitive match.
    #[instrument(skip(self))]
    pub async fn find_by_student_email(&self, email: &str) -> Result<Vec<MarksRecord>, AppError> {
        self.find(
            &[Filter::eq("studentEmail", email)],
            "Get student marks by email",
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn find_by_student_id(&self, student_id: &str) -> Result<Vec<MarksRecord>, AppError> {
        self.find(
            &[Filter::eq("studentId", student_id)],
            "Get student marks by id",
        )
        .await
    }

    /// Records for a signed-in student: by email first, then by student id
    /// equal to the identity's uid when the email lookup is empty.
    #[instrument(skip_all, fields(uid = %identity.uid))]
    pub async fn find_for_student(&self, identity: &Identity) -> Result<Vec<MarksRecord>, AppError> {
        let by_email = self.find_by_student_email(&identity.email).await?;
        if !by_email.is_empty() {
            return Ok(by_email);
        }

        info!("No marks under student email, falling back to student id");
        self.find_by_student_id(&identity.uid).await
    }

    /// Rewrites every entry field. `id`, `createdAt` and `teacherId` are kept,
    /// `updatedAt` is refreshed. `studentId` is kept too unless the entry
    /// carries a non-blank one. Last writer wins.
    #[instrument(skip(self, entry))]
    pub async fn update(&self, id: &str, entry: MarksEntry) -> Result<MarksRecord, AppError> {
        info!("Updating marks");
        let keep_student_id = entry
            .student_id
            .as_deref()
            .map_or(true, |student_id| student_id.trim().is_empty());

        let mut body = to_body(&MarksFields::from_entry(entry, None))?;
        if keep_student_id {
            body.remove("studentId");
        }

        let document = self
            .store
            .update_by_id(MARKS_COLLECTION, id, body)
            .await
            .inspect_err(|e| e.log_and_record("Update marks"))?;

        MarksRecord::try_from(document)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        info!("Deleting marks");
        self.store
            .delete_by_id(MARKS_COLLECTION, id)
            .await
            .inspect_err(|e| e.log_and_record("Delete marks"))
    }

    async fn find(&self, filters: &[Filter], context: &str) -> Result<Vec<MarksRecord>, AppError> {
        let documents = self
            .store
            .query(MARKS_COLLECTION, filters)
            .await
            .inspect_err(|e| e.log_and_record(context))?;

        documents
            .into_iter()
            .map(MarksRecord::try_from)
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(|e| e.log_and_record(context))
    }
}
