use rocket::response::content::RawHtml;

use crate::auth::{StudentSession, TeacherSession};

#[get("/")]
pub fn sign_in_page() -> RawHtml<&'static str> {
    RawHtml(include_str!("../static/login.html"))
}

#[get("/register")]
pub fn register_page() -> RawHtml<&'static str> {
    RawHtml(include_str!("../static/register.html"))
}

#[get("/teacher")]
pub fn teacher_page(_teacher: TeacherSession) -> RawHtml<&'static str> {
    RawHtml(include_str!("../static/teacher.html"))
}

#[get("/student")]
pub fn student_page(_student: StudentSession) -> RawHtml<&'static str> {
    RawHtml(include_str!("../static/student.html"))
}
