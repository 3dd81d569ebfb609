//! SeaORM entity models
//!
//! Database entities for the publication store

mod author;
mod collaboration;
mod data_source;
mod publication;
mod publication_author;
mod publication_source;
mod venue;

pub use author::{
    Entity as AuthorEntity,
    Model as Author,
    ActiveModel as AuthorActiveModel,
    Column as AuthorColumn,
};

pub use publication::{
    Entity as PublicationEntity,
    Model as Publication,
    ActiveModel as PublicationActiveModel,
    Column as PublicationColumn,
};

pub use publication_author::{
    Entity as PublicationAuthorEntity,
    Model as PublicationAuthor,
    ActiveModel as PublicationAuthorActiveModel,
    Column as PublicationAuthorColumn,
};

pub use publication_source::{
    Entity as PublicationSourceEntity,
    Model as PublicationSource,
    ActiveModel as PublicationSourceActiveModel,
    Column as PublicationSourceColumn,
};

pub use collaboration::{
    Entity as CollaborationEntity,
    Model as Collaboration,
    ActiveModel as CollaborationActiveModel,
    Column as CollaborationColumn,
};

pub use venue::{
    Entity as VenueEntity,
    Model as Venue,
    ActiveModel as VenueActiveModel,
    Column as VenueColumn,
};

pub use data_source::{
    Entity as DataSourceEntity,
    Model as DataSource,
    ActiveModel as DataSourceActiveModel,
    Column as DataSourceColumn,
};
