use rocket::{
    Request, Response,
    fairing::{Fairing, Info, Kind},
    http::{Header, Method, Status},
};

const DEFAULT_ALLOW_HEADERS: &str = "Content-Type";

/// Permissive CORS headers on every response; answers pre-flight requests.
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "Permissive CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let allow_headers = req
            .headers()
            .get_one("Access-Control-Request-Headers")
            .unwrap_or(DEFAULT_ALLOW_HEADERS)
            .to_owned();
        res.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        res.set_header(Header::new("Access-Control-Allow-Methods", "GET, POST, OPTIONS"));
        res.set_header(Header::new("Access-Control-Allow-Headers", allow_headers));

        // no OPTIONS routes are mounted; pre-flights fall through to 404
        if req.method() == Method::Options && res.status() == Status::NotFound {
            res.set_status(Status::Ok);
            res.set_sized_body(0, std::io::Cursor::new(""));
        }
    }
}
